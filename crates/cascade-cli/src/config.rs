//! Gateway configuration file.
//!
//! One document holds the `[server]` section and the routing table. TOML is
//! the default; files ending in `.json` are parsed as JSON.

use cascade_core::{CascadeError, CascadeResult};
use cascade_router::{RoutingConfig, RoutingTable};
use serde::Deserialize;
use std::path::Path;

/// Everything the `cascade` binary reads from its config file.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(flatten)]
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Reload the routing table when the config file changes.
    #[serde(default = "default_watch")]
    pub watch: bool,
    #[serde(default = "default_debounce_ms")]
    pub reload_debounce_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            watch: default_watch(),
            reload_debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_watch() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    500
}

impl GatewayConfig {
    /// Validates the routing section into a snapshot.
    pub fn routing_table(&self) -> CascadeResult<RoutingTable> {
        RoutingTable::from_config(self.routing.clone())
    }
}

/// Reads and parses a config file, choosing the format by extension.
pub fn load(path: &Path) -> CascadeResult<GatewayConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CascadeError::Config(format!("Failed to read config '{}': {e}", path.display()))
    })?;
    parse(&content, is_json(path)).map_err(|e| {
        CascadeError::Config(format!("Failed to parse config '{}': {e}", path.display()))
    })
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn parse(content: &str, json: bool) -> Result<GatewayConfig, String> {
    if json {
        serde_json::from_str(content).map_err(|e| e.to_string())
    } else {
        toml::from_str(content).map_err(|e| e.to_string())
    }
}
