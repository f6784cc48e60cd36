//! Builds the ordered candidate list for one request.

use crate::config::RoutingTable;
use crate::provider::Provider;
use crate::resolver::{self, ResolvedProfile};
use crate::secrets::SecretSource;
use cascade_core::{CascadeResult, ChatRequest, Modality};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// A profile made concrete for one invocation attempt.
#[derive(Clone, PartialEq)]
pub struct Candidate {
    /// Role id the candidate was built from.
    pub role_id: String,
    /// Vendor family.
    pub provider: Provider,
    /// Qualified vendor string, used to identify the candidate.
    pub vendor_model: String,
    /// Model name sent on the wire.
    pub model: String,
    /// Resolved secret, if the variable was set.
    pub api_key: Option<String>,
    /// Name of the variable the secret was resolved from.
    pub api_key_variable: String,
    /// Vendor base URL, without trailing slash.
    pub api_base: String,
    /// Vendor API version.
    pub api_version: Option<String>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Effective output token limit.
    pub max_tokens: u32,
    /// Input budget used when this candidate runs as a fallback.
    pub context_tokens: usize,
    /// Temperature range the vendor accepts.
    pub temperature_range: (f32, f32),
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("role_id", &self.role_id)
            .field("vendor_model", &self.vendor_model)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("max_tokens", &self.max_tokens)
            .field("context_tokens", &self.context_tokens)
            .finish()
    }
}

impl Candidate {
    fn from_resolved(
        resolved: &ResolvedProfile<'_>,
        table: &RoutingTable,
        request: &ChatRequest,
        secrets: &dyn SecretSource,
    ) -> Self {
        let profile = resolved.profile;
        let api_key = secrets.get(&resolved.api_key_variable);
        if api_key.is_none() {
            warn!(
                role_id = %profile.role_id,
                variable = %resolved.api_key_variable,
                "Secret not set for candidate"
            );
        }
        Self {
            role_id: profile.role_id.clone(),
            provider: profile.provider.clone(),
            vendor_model: resolved.vendor_model.clone(),
            model: resolved.model.clone(),
            api_key,
            api_key_variable: resolved.api_key_variable.clone(),
            api_base: resolved.api_base.clone(),
            api_version: profile.api_version.clone(),
            timeout: Duration::from_secs(profile.timeout_secs),
            max_tokens: request.max_tokens.unwrap_or(profile.max_tokens),
            context_tokens: table.context_tokens_for(profile),
            temperature_range: resolved.temperature_range,
        }
    }

    /// Clamps a requested temperature into the vendor's accepted range.
    pub fn clamp_temperature(&self, temperature: Option<f32>) -> Option<f32> {
        let (lo, hi) = self.temperature_range;
        temperature.map(|t| t.clamp(lo, hi))
    }
}

/// Builds the ordered list of candidates for a request.
///
/// The primary always comes first. Media requests get at most one extra
/// candidate: the first media-capable profile in declaration order, bypassing
/// the ordinary fallbacks. Text requests cascade through the profile's own
/// fallbacks, or the table-wide order when the profile declares none.
/// Duplicates and dangling role ids are skipped.
pub fn build(
    primary: &ResolvedProfile<'_>,
    table: &RoutingTable,
    modality: Modality,
    request: &ChatRequest,
    secrets: &dyn SecretSource,
) -> CascadeResult<Vec<Candidate>> {
    let mut chain = vec![Candidate::from_resolved(primary, table, request, secrets)];

    match modality {
        Modality::Media => {
            let vision = table
                .profiles()
                .iter()
                .find(|p| p.supports_media && p.role_id != primary.role_id());
            match vision {
                Some(profile) => {
                    let resolved = resolver::normalize(profile)?;
                    chain.push(Candidate::from_resolved(&resolved, table, request, secrets));
                }
                None => {
                    warn!(primary = primary.role_id(), "No media-capable fallback configured");
                }
            }
        }
        Modality::Text => {
            let declared = &primary.profile.fallbacks;
            let fallbacks = if declared.is_empty() {
                table.fallback_order()
            } else {
                declared.as_slice()
            };

            let mut seen: HashSet<&str> = HashSet::new();
            seen.insert(primary.role_id());
            for role_id in fallbacks {
                if !seen.insert(role_id.as_str()) {
                    continue;
                }
                let Some(profile) = table.get(role_id) else {
                    warn!(role_id = %role_id, "Skipping unknown fallback role");
                    continue;
                };
                let resolved = resolver::normalize(profile)?;
                chain.push(Candidate::from_resolved(&resolved, table, request, secrets));
            }
        }
    }

    Ok(chain)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{ModelProfile, RoutingConfig};
    use crate::secrets::StaticSecrets;
    use cascade_core::Message;

    fn profile(role: &str, fallbacks: &[&str], media: bool) -> ModelProfile {
        let mut p = ModelProfile::new(role, Provider::OpenAi, format!("{role}-model"));
        p.fallbacks = fallbacks.iter().map(|s| s.to_string()).collect();
        p.supports_media = media;
        p
    }

    fn table(profiles: Vec<ModelProfile>, fallback_order: &[&str]) -> RoutingTable {
        RoutingTable::from_config(RoutingConfig {
            default_role: profiles[0].role_id.clone(),
            fallback_order: fallback_order.iter().map(|s| s.to_string()).collect(),
            max_context_tokens: 1000,
            profiles,
        })
        .unwrap()
    }

    fn roles(chain: &[Candidate]) -> Vec<&str> {
        chain.iter().map(|c| c.role_id.as_str()).collect()
    }

    fn text_request() -> ChatRequest {
        ChatRequest::new(None, vec![Message::user("hi")])
    }

    fn build_for(table: &RoutingTable, role: &str, modality: Modality) -> Vec<Candidate> {
        let primary = resolver::resolve(Some(role), table).unwrap();
        build(&primary, table, modality, &text_request(), &StaticSecrets::new()).unwrap()
    }

    #[test]
    fn profile_fallbacks_in_declared_order() {
        let t = table(
            vec![profile("a", &["c", "b"], false), profile("b", &[], false), profile("c", &[], false)],
            &["b"],
        );
        assert_eq!(roles(&build_for(&t, "a", Modality::Text)), ["a", "c", "b"]);
    }

    #[test]
    fn table_order_used_only_when_profile_declares_none() {
        let t = table(
            vec![profile("a", &[], false), profile("b", &[], false), profile("c", &[], false)],
            &["c", "b"],
        );
        assert_eq!(roles(&build_for(&t, "a", Modality::Text)), ["a", "c", "b"]);
    }

    #[test]
    fn duplicates_and_self_are_skipped() {
        let t = table(
            vec![profile("a", &["b", "a", "b", "c"], false), profile("b", &[], false), profile("c", &[], false)],
            &[],
        );
        assert_eq!(roles(&build_for(&t, "a", Modality::Text)), ["a", "b", "c"]);
    }

    #[test]
    fn dangling_fallbacks_are_skipped() {
        let t = table(vec![profile("a", &["ghost", "b"], false), profile("b", &[], false)], &[]);
        assert_eq!(roles(&build_for(&t, "a", Modality::Text)), ["a", "b"]);
    }

    #[test]
    fn media_bypasses_ordinary_fallbacks() {
        let t = table(
            vec![
                profile("a", &["b", "c"], false),
                profile("b", &[], false),
                profile("c", &[], false),
                profile("vision", &[], true),
                profile("vision2", &[], true),
            ],
            &["b"],
        );
        assert_eq!(roles(&build_for(&t, "a", Modality::Media)), ["a", "vision"]);
    }

    #[test]
    fn media_fallback_is_distinct_from_primary() {
        let t = table(
            vec![profile("vision", &["b"], true), profile("b", &[], false), profile("vision2", &[], true)],
            &[],
        );
        assert_eq!(roles(&build_for(&t, "vision", Modality::Media)), ["vision", "vision2"]);
    }

    #[test]
    fn media_without_capable_profile_is_primary_only() {
        let t = table(vec![profile("a", &["b"], false), profile("b", &[], false)], &[]);
        assert_eq!(roles(&build_for(&t, "a", Modality::Media)), ["a"]);
    }

    #[test]
    fn candidate_carries_resolved_details() {
        let mut p = profile("a", &[], false);
        p.timeout_secs = 7;
        p.max_tokens = 512;
        p.context_tokens = Some(300);
        let t = table(vec![p], &[]);
        let primary = resolver::resolve(Some("a"), &t).unwrap();
        let secrets = StaticSecrets::new().with("OPENAI_API_KEY", "sk-1");

        let chain = build(&primary, &t, Modality::Text, &text_request(), &secrets).unwrap();
        let c = &chain[0];
        assert_eq!(c.vendor_model, "openai/a-model");
        assert_eq!(c.api_key.as_deref(), Some("sk-1"));
        assert_eq!(c.timeout, Duration::from_secs(7));
        assert_eq!(c.max_tokens, 512);
        assert_eq!(c.context_tokens, 300);
        assert!(!format!("{c:?}").contains("sk-1"));

        let mut req = text_request();
        req.max_tokens = Some(64);
        let chain = build(&primary, &t, Modality::Text, &req, &secrets).unwrap();
        assert_eq!(chain[0].max_tokens, 64);
    }

    #[test]
    fn temperature_is_clamped_per_provider() {
        let mut glm = ModelProfile::new("glm", Provider::Zhipu, "glm-4");
        glm.fallbacks = vec![];
        let t = table(vec![glm], &[]);
        let chain = build_for(&t, "glm", Modality::Text);
        assert_eq!(chain[0].clamp_temperature(Some(1.7)), Some(1.0));
        assert_eq!(chain[0].clamp_temperature(Some(0.0)), Some(0.01));
        assert_eq!(chain[0].clamp_temperature(None), None);
    }
}
