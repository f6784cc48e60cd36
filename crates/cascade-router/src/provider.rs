use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream vendor family of a profile.
///
/// Serialized as its lowercase tag. Tags without a dedicated variant land in
/// [`Provider::Other`] and are served by the generic rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provider {
    /// Google Gemini, through its OpenAI-compatible endpoint.
    Google,
    /// OpenAI or any OpenAI-compatible server.
    OpenAi,
    /// Zhipu GLM.
    Zhipu,
    /// Baidu ERNIE (Qianfan v2).
    Ernie,
    /// Any other vendor tag.
    Other(String),
}

impl Provider {
    /// The canonical tag of this provider.
    pub fn tag(&self) -> &str {
        match self {
            Self::Google => "google",
            Self::OpenAi => "openai",
            Self::Zhipu => "zhipu",
            Self::Ernie => "ernie",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for Provider {
    fn from(tag: String) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "google" | "gemini" => Self::Google,
            "openai" | "openai-compatible" | "openai_compatible" => Self::OpenAi,
            "zhipu" | "glm" => Self::Zhipu,
            "ernie" | "baidu" => Self::Ernie,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<Provider> for String {
    fn from(provider: Provider) -> Self {
        provider.tag().to_string()
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Per-provider normalization rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderRule {
    /// Tag the rule applies to.
    pub tag: &'static str,
    /// Prefix of the qualified vendor model string.
    pub model_prefix: &'static str,
    /// Base URL used when the profile sets none.
    pub default_api_base: Option<&'static str>,
    /// Secret variable used when the profile names none.
    pub default_key_variable: &'static str,
    /// Inclusive temperature range accepted by the vendor.
    pub temperature_range: (f32, f32),
}

/// Known providers. Adding a provider means adding a row here.
const RULES: &[ProviderRule] = &[
    ProviderRule {
        tag: "google",
        model_prefix: "gemini/",
        default_api_base: Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        default_key_variable: "GEMINI_API_KEY",
        temperature_range: (0.0, 2.0),
    },
    ProviderRule {
        tag: "openai",
        model_prefix: "openai/",
        default_api_base: Some("https://api.openai.com/v1"),
        default_key_variable: "OPENAI_API_KEY",
        temperature_range: (0.0, 2.0),
    },
    ProviderRule {
        tag: "zhipu",
        model_prefix: "zhipu/",
        default_api_base: Some("https://open.bigmodel.cn/api/paas/v4"),
        default_key_variable: "GLM_API_KEY",
        temperature_range: (0.01, 1.0),
    },
    ProviderRule {
        tag: "ernie",
        model_prefix: "ernie/",
        default_api_base: Some("https://qianfan.baidubce.com/v2"),
        default_key_variable: "ERNIE_API_KEY",
        temperature_range: (0.01, 1.0),
    },
];

const GENERIC_TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);

/// Looks up the dedicated rule for a provider, if it has one.
pub fn rule_for(provider: &Provider) -> Option<&'static ProviderRule> {
    RULES.iter().find(|r| r.tag == provider.tag())
}

/// Composes the qualified vendor string for a model.
///
/// Known providers use their fixed prefix; everything else is `<tag>/<model>`.
/// A model that already carries the prefix is not prefixed twice.
pub fn vendor_model_for(provider: &Provider, model: &str) -> String {
    let prefix = match rule_for(provider) {
        Some(rule) => rule.model_prefix.to_string(),
        None => format!("{}/", provider.tag()),
    };
    format!("{prefix}{}", wire_model_for(provider, model))
}

/// The model name as the vendor expects it on the wire (prefix stripped).
pub fn wire_model_for<'a>(provider: &Provider, model: &'a str) -> &'a str {
    let stripped = match rule_for(provider) {
        Some(rule) => model.strip_prefix(rule.model_prefix),
        None => model
            .strip_prefix(provider.tag())
            .and_then(|rest| rest.strip_prefix('/')),
    };
    stripped.unwrap_or(model)
}

/// Default secret variable for a provider.
pub fn default_key_variable(provider: &Provider) -> String {
    match rule_for(provider) {
        Some(rule) => rule.default_key_variable.to_string(),
        None => format!(
            "{}_API_KEY",
            provider.tag().to_ascii_uppercase().replace('-', "_")
        ),
    }
}

/// Default base URL for a provider, if it has one.
pub fn default_api_base(provider: &Provider) -> Option<&'static str> {
    rule_for(provider).and_then(|r| r.default_api_base)
}

/// Temperature range accepted by a provider.
pub fn temperature_range(provider: &Provider) -> (f32, f32) {
    rule_for(provider).map_or(GENERIC_TEMPERATURE_RANGE, |r| r.temperature_range)
}
