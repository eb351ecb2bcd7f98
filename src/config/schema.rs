//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::filters::FilterType;

/// Root configuration for the edge gateway.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Poll loop timing shared by both pollers.
    pub poller: PollerConfig,

    /// Revision store and its poller.
    pub store: StoreConfig,

    /// File-based filter directories and their poller.
    pub source: SourceConfig,

    /// Canary shadow execution.
    pub canary: CanaryConfig,

    /// Runtime disable properties.
    pub toggles: ToggleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Seconds between poll cycles.
    pub interval_secs: u64,

    /// Upper bound on waiting for a poller to stop.
    pub shutdown_timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            shutdown_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Run the store poller.
    pub enabled: bool,

    /// Author recorded on revisions that do not name one.
    pub author: String,

    /// Directory of `<type>/<name>.<ext>` sources added and activated at startup.
    pub seed_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            author: "gateway".to_string(),
            seed_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Run the source poller.
    pub enabled: bool,

    pub directories: Vec<SourceDirectoryConfig>,

    /// File extension of filter sources, without the dot.
    pub extension: String,

    /// Use file-system notifications in addition to polling.
    pub watch: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directories: Vec::new(),
            extension: "filter".to_string(),
            watch: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceDirectoryConfig {
    pub path: PathBuf,

    /// Type of every filter in this directory.
    pub filter_type: FilterType,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CanaryConfig {
    /// Fraction of requests, 0.0 to 1.0, that also run canary revisions.
    pub sample_rate: f64,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self { sample_rate: 0.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ToggleConfig {
    /// Disable property names currently switched on.
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.poller.interval_secs, 5);
        assert!(config.store.enabled);
        assert!(!config.source.enabled);
        assert_eq!(config.source.extension, "filter");
        assert_eq!(config.canary.sample_rate, 0.0);
    }

    #[test]
    fn test_parse_sections() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [poller]
            interval_secs = 2

            [source]
            enabled = true
            watch = false

            [[source.directories]]
            path = "filters/pre"
            filter_type = "pre"

            [[source.directories]]
            path = "filters/route"
            filter_type = "route"

            [canary]
            sample_rate = 0.25

            [toggles]
            disabled = ["checkAuth.pre.disable"]

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.poller.interval_secs, 2);
        assert_eq!(config.poller.shutdown_timeout_secs, 5);
        assert_eq!(config.source.directories.len(), 2);
        assert_eq!(config.source.directories[1].filter_type, FilterType::Route);
        assert_eq!(config.canary.sample_rate, 0.25);
        assert_eq!(config.toggles.disabled, vec!["checkAuth.pre.disable"]);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
