pub mod openai;

use crate::chain::Candidate;
use crate::provider::Provider;
use async_trait::async_trait;
use cascade_core::{ChatRequest, Message, ProviderError};
use futures_util::Stream;
use std::fmt;
use std::pin::Pin;

/// Upstream fragments of an incremental response, in arrival order.
pub type FragmentStream =
    Pin<Box<dyn Stream<Item = Result<serde_json::Value, ProviderError>> + Send>>;

/// What a successful invocation hands back.
pub enum ProviderReply {
    /// The vendor's complete response body.
    Complete(serde_json::Value),
    /// An incremental response.
    Stream(FragmentStream),
}

impl fmt::Debug for ProviderReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete(body) => f.debug_tuple("Complete").field(body).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A fully normalized request for one candidate.
#[derive(Clone)]
pub struct ProviderRequest {
    /// Vendor family.
    pub provider: Provider,
    /// Qualified vendor string.
    pub vendor_model: String,
    /// Model name sent on the wire.
    pub model: String,
    /// Vendor base URL.
    pub api_base: String,
    /// Vendor API version.
    pub api_version: Option<String>,
    /// Resolved secret.
    pub api_key: Option<String>,
    /// Where the secret should have come from.
    pub api_key_variable: String,
    /// Messages, possibly truncated for a fallback.
    pub messages: Vec<Message>,
    /// Temperature, already clamped to the vendor's range.
    pub temperature: Option<f32>,
    /// Output token limit.
    pub max_tokens: u32,
    /// Whether incremental output is wanted.
    pub stream: bool,
}

impl ProviderRequest {
    /// Builds the normalized request a candidate sends for `request`.
    pub fn for_candidate(candidate: &Candidate, request: &ChatRequest, messages: Vec<Message>) -> Self {
        Self {
            provider: candidate.provider.clone(),
            vendor_model: candidate.vendor_model.clone(),
            model: candidate.model.clone(),
            api_base: candidate.api_base.clone(),
            api_version: candidate.api_version.clone(),
            api_key: candidate.api_key.clone(),
            api_key_variable: candidate.api_key_variable.clone(),
            messages,
            temperature: candidate.clamp_temperature(request.temperature),
            max_tokens: candidate.max_tokens,
            stream: request.stream,
        }
    }

    /// Chat-completions body in the OpenAI-compatible shape.
    pub fn body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": self.messages,
            "max_tokens": self.max_tokens,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if self.stream {
            body["stream"] = serde_json::json!(true);
        }
        body
    }
}

impl fmt::Debug for ProviderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRequest")
            .field("vendor_model", &self.vendor_model)
            .field("api_base", &self.api_base)
            .field("messages", &self.messages.len())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("stream", &self.stream)
            .finish()
    }
}

/// The capability that performs the actual network call to a vendor.
///
/// Implementations report every failure as a [`ProviderError`]; the
/// dispatcher owns timeouts and cascading.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// Sends one request upstream.
    async fn invoke(&self, request: ProviderRequest) -> Result<ProviderReply, ProviderError>;
}
