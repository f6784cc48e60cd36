//! Maps a requested role to a fully specified upstream profile.

use crate::config::{ModelProfile, RoutingTable};
use crate::provider::{self, Provider};
use cascade_core::{CascadeError, CascadeResult};
use tracing::debug;

/// A profile with all provider-specific defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProfile<'a> {
    /// The profile as configured.
    pub profile: &'a ModelProfile,
    /// Qualified vendor string, e.g. `gemini/gemini-1.5-pro`.
    pub vendor_model: String,
    /// Model name sent on the wire.
    pub model: String,
    /// Name of the secret to resolve.
    pub api_key_variable: String,
    /// Base URL of the vendor endpoint.
    pub api_base: String,
    /// Inclusive temperature range the vendor accepts.
    pub temperature_range: (f32, f32),
}

impl ResolvedProfile<'_> {
    /// Role id of the underlying profile.
    pub fn role_id(&self) -> &str {
        &self.profile.role_id
    }

    /// Vendor family of the underlying profile.
    pub fn provider(&self) -> &Provider {
        &self.profile.provider
    }
}

/// Resolves a requested role against the table.
///
/// Unknown or missing roles silently degrade to the table's default role.
pub fn resolve<'a>(
    requested_role: Option<&str>,
    table: &'a RoutingTable,
) -> CascadeResult<ResolvedProfile<'a>> {
    let profile = match requested_role.and_then(|role| table.get(role)) {
        Some(profile) => profile,
        None => {
            debug!(
                requested = requested_role.unwrap_or("<none>"),
                default = table.default_role(),
                "Unknown role, using default"
            );
            table.default_profile()?
        }
    };
    normalize(profile)
}

/// Applies the provider rule table to a profile.
pub fn normalize(profile: &ModelProfile) -> CascadeResult<ResolvedProfile<'_>> {
    let raw_model = profile.model.trim();
    if raw_model.is_empty() {
        return Err(CascadeError::Config(format!(
            "profile '{}' has no model name",
            profile.role_id
        )));
    }
    let model = provider::wire_model_for(&profile.provider, raw_model);
    if model.is_empty() {
        return Err(CascadeError::Config(format!(
            "profile '{}' has no model name after its '{}' prefix",
            profile.role_id, profile.provider
        )));
    }

    let api_base = profile
        .api_base
        .clone()
        .or_else(|| provider::default_api_base(&profile.provider).map(str::to_string))
        .ok_or_else(|| {
            CascadeError::Config(format!(
                "profile '{}': provider '{}' has no default endpoint, set api_base",
                profile.role_id, profile.provider
            ))
        })?;

    let api_key_variable = profile
        .api_key_variable
        .clone()
        .unwrap_or_else(|| provider::default_key_variable(&profile.provider));

    Ok(ResolvedProfile {
        profile,
        vendor_model: provider::vendor_model_for(&profile.provider, model),
        model: model.to_string(),
        api_key_variable,
        api_base: api_base.trim_end_matches('/').to_string(),
        temperature_range: provider::temperature_range(&profile.provider),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::RoutingConfig;

    fn table() -> RoutingTable {
        let mut local = ModelProfile::new("local", Provider::Other("ollama".into()), "llama3");
        local.api_base = Some("http://localhost:11434/v1/".into());
        RoutingTable::from_config(RoutingConfig {
            default_role: "primary".into(),
            fallback_order: vec![],
            max_context_tokens: 4096,
            profiles: vec![
                ModelProfile::new("primary", Provider::Google, "gemini-1.5-pro"),
                ModelProfile::new("glm", Provider::Zhipu, "glm-4"),
                local,
            ],
        })
        .unwrap()
    }

    #[test]
    fn known_role_resolves_to_its_profile() {
        let table = table();
        let resolved = resolve(Some("glm"), &table).unwrap();
        assert_eq!(resolved.role_id(), "glm");
        assert_eq!(resolved.vendor_model, "zhipu/glm-4");
        assert_eq!(resolved.api_key_variable, "GLM_API_KEY");
        assert_eq!(resolved.api_base, "https://open.bigmodel.cn/api/paas/v4");
    }

    #[test]
    fn unknown_role_resolves_to_default() {
        let table = table();
        let resolved = resolve(Some("does-not-exist"), &table).unwrap();
        assert_eq!(resolved.role_id(), "primary");
        assert_eq!(resolved.vendor_model, "gemini/gemini-1.5-pro");
    }

    #[test]
    fn missing_role_resolves_to_default() {
        let table = table();
        assert_eq!(resolve(None, &table).unwrap().role_id(), "primary");
    }

    #[test]
    fn generic_provider_composes_tag_and_trims_base() {
        let table = table();
        let resolved = resolve(Some("local"), &table).unwrap();
        assert_eq!(resolved.vendor_model, "ollama/llama3");
        assert_eq!(resolved.model, "llama3");
        assert_eq!(resolved.api_base, "http://localhost:11434/v1");
        assert_eq!(resolved.api_key_variable, "OLLAMA_API_KEY");
    }

    #[test]
    fn explicit_key_variable_wins() {
        let mut profile = ModelProfile::new("p", Provider::Google, "gemini-pro");
        profile.api_key_variable = Some("TEAM_GEMINI_KEY".into());
        assert_eq!(normalize(&profile).unwrap().api_key_variable, "TEAM_GEMINI_KEY");
    }

    #[test]
    fn generic_provider_without_base_is_config_error() {
        let profile = ModelProfile::new("p", Provider::Other("acme".into()), "m1");
        assert!(matches!(normalize(&profile), Err(CascadeError::Config(_))));
    }

    #[test]
    fn bare_prefix_is_config_error() {
        let profile = ModelProfile::new("p", Provider::Google, "gemini/");
        assert!(matches!(normalize(&profile), Err(CascadeError::Config(_))));
    }
}
