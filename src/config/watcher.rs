//! Configuration file watcher for hot reload.
//!
//! Only the toggle and canary sections apply without a restart. Edits to any
//! other section are still forwarded, with a warning naming what was ignored.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

pub struct ConfigWatcher {
    path: PathBuf,
    current: GatewayConfig,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Watch `path`, starting from the configuration already in use.
    pub fn new(path: &Path, current: GatewayConfig) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                current,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            mut current,
            update_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let next = match load_config(&path) {
                        Ok(next) => next,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                            return;
                        }
                    };
                    // Editors often emit several events per save.
                    if next == current {
                        tracing::debug!("Config file touched without changes");
                        return;
                    }
                    let ignored = restart_required(&current, &next);
                    if !ignored.is_empty() {
                        tracing::warn!(sections = ?ignored, "Config sections changed that only apply after restart");
                    }
                    tracing::info!("Config file change detected, applying live settings");
                    current = next.clone();
                    let _ = update_tx.send(next);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?watched, "Config watcher started");
        Ok(watcher)
    }
}

/// Sections that differ between `prev` and `next` but are only read at startup.
pub fn restart_required(prev: &GatewayConfig, next: &GatewayConfig) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if prev.listener != next.listener {
        changed.push("listener");
    }
    if prev.timeouts != next.timeouts {
        changed.push("timeouts");
    }
    if prev.poller != next.poller {
        changed.push("poller");
    }
    if prev.store != next.store {
        changed.push("store");
    }
    if prev.source != next.source {
        changed.push("source");
    }
    if prev.observability != next.observability {
        changed.push("observability");
    }
    if prev.admin != next.admin {
        changed.push("admin");
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_sections_need_no_restart() {
        let prev = GatewayConfig::default();
        let mut next = prev.clone();
        next.toggles.disabled = vec!["a.pre.disable".into()];
        next.canary.sample_rate = 0.25;
        assert!(restart_required(&prev, &next).is_empty());
    }

    #[test]
    fn test_startup_sections_reported() {
        let prev = GatewayConfig::default();
        let mut next = prev.clone();
        next.listener.bind_address = "0.0.0.0:9999".into();
        next.poller.interval_secs = 30;
        assert_eq!(restart_required(&prev, &next), vec!["listener", "poller"]);
    }
}
