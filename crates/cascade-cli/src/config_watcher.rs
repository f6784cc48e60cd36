//! Config hot-reload watcher.
//!
//! Watches the gateway config file and hands every successfully parsed
//! revision to a callback after a debounce window.

use crate::config::{self, GatewayConfig};
use cascade_core::{CascadeError, CascadeResult};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

/// Watches a config file on disk and calls back on every (debounced) change.
///
/// Dropping the watcher stops the background thread and releases the watch.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `config_path`.
    ///
    /// The parent directory is watched so editors that replace the file by
    /// rename are still seen. `on_reload` runs on a background thread; parse
    /// failures are logged and skipped.
    pub fn start<F>(config_path: PathBuf, debounce_ms: u64, on_reload: F) -> CascadeResult<Self>
    where
        F: Fn(GatewayConfig) + Send + 'static,
    {
        let (tx, rx) = std_mpsc::channel();
        let file_name = config_path.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let Ok(event) = res else { return };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            let ours = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if ours {
                let _ = tx.send(());
            }
        })
        .map_err(|e| CascadeError::Config(format!("Failed to create file watcher: {e}")))?;

        watcher
            .watch(watch_root(&config_path), RecursiveMode::NonRecursive)
            .map_err(|e| CascadeError::Config(format!("Failed to watch config file: {e}")))?;

        let path = config_path.clone();
        std::thread::spawn(move || {
            let debounce = Duration::from_millis(debounce_ms);

            while rx.recv().is_ok() {
                // Let the burst of writes settle, then reload once.
                std::thread::sleep(debounce);
                while rx.try_recv().is_ok() {}

                match config::load(&path) {
                    Ok(config) => on_reload(config),
                    Err(e) => tracing::warn!(error = %e, "Failed to reload config"),
                }
            }

            tracing::debug!("Config watcher thread exiting");
        });

        tracing::info!(path = %config_path.display(), "Config hot-reload watcher started");

        Ok(Self { _watcher: watcher })
    }
}

fn watch_root(config_path: &Path) -> &Path {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Builds the reload callback that swaps the routing snapshot.
///
/// An invalid revision is logged and the current snapshot stays in place.
pub fn reload_into(handle: cascade_router::TableHandle) -> impl Fn(GatewayConfig) + Send + 'static {
    move |config: GatewayConfig| match config.routing_table() {
        Ok(table) => {
            let profiles = table.profiles().len();
            let default_role = table.default_role().to_string();
            handle.replace(table);
            tracing::info!(profiles, default_role = %default_role, "Routing table reloaded");
        }
        Err(e) => tracing::warn!(error = %e, "Rejected config reload; keeping current routing table"),
    }
}
