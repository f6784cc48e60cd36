use crate::provider::Provider;
use crate::resolver;
use cascade_core::{CascadeError, CascadeResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// One upstream target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Logical name callers use to request this profile.
    pub role_id: String,
    /// Vendor family.
    pub provider: Provider,
    /// Vendor model name.
    pub model: String,
    /// Name of the secret to resolve; defaults per provider.
    #[serde(default)]
    pub api_key_variable: Option<String>,
    /// Base URL override.
    #[serde(default)]
    pub api_base: Option<String>,
    /// Vendor API version, sent as the `api-version` query parameter.
    #[serde(default)]
    pub api_version: Option<String>,
    /// Output token limit used when the request does not set one.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-attempt timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Whether the model accepts image parts.
    #[serde(default)]
    pub supports_media: bool,
    /// Ordered role ids to cascade to when this profile fails.
    #[serde(default)]
    pub fallbacks: Vec<String>,
    /// Context window; the table-wide limit applies when unset.
    #[serde(default)]
    pub context_tokens: Option<usize>,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    60
}

/// Upper bound on a per-attempt timeout (one day).
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

fn default_max_context_tokens() -> usize {
    8192
}

impl ModelProfile {
    /// Creates a profile with default limits and no fallbacks.
    pub fn new(role_id: impl Into<String>, provider: Provider, model: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            provider,
            model: model.into(),
            api_key_variable: None,
            api_base: None,
            api_version: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            supports_media: false,
            fallbacks: Vec::new(),
            context_tokens: None,
        }
    }
}

/// Declarative routing document, as it appears in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Role used for unknown or missing requested roles.
    pub default_role: String,
    /// Fallbacks for profiles that declare none of their own.
    #[serde(default)]
    pub fallback_order: Vec<String>,
    /// Context window for profiles that declare none.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    /// Profiles in declaration order.
    pub profiles: Vec<ModelProfile>,
}

/// Validated, immutable routing snapshot.
///
/// Build one with [`RoutingTable::from_config`] (or deserialize it directly);
/// every profile has been normalized once so resolution cannot hit a
/// configuration error for a table that loaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RoutingConfig")]
pub struct RoutingTable {
    profiles: Vec<ModelProfile>,
    index: HashMap<String, usize>,
    default_role: String,
    fallback_order: Vec<String>,
    max_context_tokens: usize,
}

impl RoutingTable {
    /// Validates a routing document and builds the snapshot.
    pub fn from_config(config: RoutingConfig) -> CascadeResult<Self> {
        if config.profiles.is_empty() {
            return Err(CascadeError::Config("routing table has no profiles".into()));
        }
        if config.max_context_tokens == 0 {
            return Err(CascadeError::Config("max_context_tokens must be positive".into()));
        }

        let mut index = HashMap::with_capacity(config.profiles.len());
        for (i, profile) in config.profiles.iter().enumerate() {
            if profile.role_id.trim().is_empty() {
                return Err(CascadeError::Config(format!("profile #{i} has an empty role_id")));
            }
            if index.insert(profile.role_id.clone(), i).is_some() {
                return Err(CascadeError::Config(format!(
                    "duplicate role_id '{}'",
                    profile.role_id
                )));
            }
            validate_limits(profile)?;
            resolver::normalize(profile)?;
        }

        if !index.contains_key(&config.default_role) {
            return Err(CascadeError::Config(format!(
                "default_role '{}' does not name a profile",
                config.default_role
            )));
        }

        let table = Self {
            profiles: config.profiles,
            index,
            default_role: config.default_role,
            fallback_order: config.fallback_order,
            max_context_tokens: config.max_context_tokens,
        };
        table.warn_dangling();
        Ok(table)
    }

    /// Looks up a profile by role id.
    pub fn get(&self, role_id: &str) -> Option<&ModelProfile> {
        self.index.get(role_id).map(|&i| &self.profiles[i])
    }

    /// The profile used when a requested role is unknown.
    pub fn default_profile(&self) -> CascadeResult<&ModelProfile> {
        self.get(&self.default_role).ok_or_else(|| {
            CascadeError::Config(format!("default_role '{}' is not configured", self.default_role))
        })
    }

    /// The default role id.
    pub fn default_role(&self) -> &str {
        &self.default_role
    }

    /// Table-wide fallback order.
    pub fn fallback_order(&self) -> &[String] {
        &self.fallback_order
    }

    /// Table-wide context window.
    pub fn max_context_tokens(&self) -> usize {
        self.max_context_tokens
    }

    /// Profiles in declaration order.
    pub fn profiles(&self) -> &[ModelProfile] {
        &self.profiles
    }

    /// Context window of a profile, falling back to the table-wide limit.
    pub fn context_tokens_for(&self, profile: &ModelProfile) -> usize {
        profile.context_tokens.unwrap_or(self.max_context_tokens)
    }

    fn warn_dangling(&self) {
        let declared = self
            .profiles
            .iter()
            .flat_map(|p| p.fallbacks.iter())
            .chain(self.fallback_order.iter());
        for role_id in declared {
            if !self.index.contains_key(role_id) {
                warn!(role_id = %role_id, "Fallback references an unknown role; it will be skipped");
            }
        }
    }
}

impl TryFrom<RoutingConfig> for RoutingTable {
    type Error = CascadeError;

    fn try_from(config: RoutingConfig) -> Result<Self, Self::Error> {
        Self::from_config(config)
    }
}

fn validate_limits(profile: &ModelProfile) -> CascadeResult<()> {
    if profile.max_tokens == 0 {
        return Err(CascadeError::Config(format!(
            "profile '{}': max_tokens must be positive",
            profile.role_id
        )));
    }
    if profile.timeout_secs == 0 || profile.timeout_secs > MAX_TIMEOUT_SECS {
        return Err(CascadeError::Config(format!(
            "profile '{}': timeout_secs must be between 1 and {MAX_TIMEOUT_SECS}",
            profile.role_id
        )));
    }
    if profile.context_tokens == Some(0) {
        return Err(CascadeError::Config(format!(
            "profile '{}': context_tokens must be positive",
            profile.role_id
        )));
    }
    Ok(())
}

/// Shared handle to the current routing snapshot.
///
/// Readers take an `Arc` once per request; a reload swaps the whole snapshot,
/// so in-flight requests keep the table they started with.
#[derive(Debug, Clone)]
pub struct TableHandle {
    inner: Arc<RwLock<Arc<RoutingTable>>>,
}

impl TableHandle {
    /// Wraps an initial snapshot.
    pub fn new(table: RoutingTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.inner.read().clone()
    }

    /// Installs a new snapshot, returning the previous one.
    pub fn replace(&self, table: RoutingTable) -> Arc<RoutingTable> {
        std::mem::replace(&mut *self.inner.write(), Arc::new(table))
    }
}
