use std::collections::HashMap;

/// Name → secret lookup, consulted every time a candidate is built.
pub trait SecretSource: Send + Sync {
    /// Returns the secret stored under `name`, if any.
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads secrets from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Fixed in-memory secrets.
#[derive(Default, Clone)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl SecretSource for StaticSecrets {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

impl std::fmt::Debug for StaticSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSecrets")
            .field("names", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}
