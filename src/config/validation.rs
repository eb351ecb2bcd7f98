//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, rates within 0..=1, addresses parse)
//! - Detect conflicting filter directories
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;

/// One semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("'{value}' is not a socket address")));
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.poller.interval_secs == 0 {
        errors.push(ValidationError::new("poller.interval_secs", "must be greater than 0"));
    }

    let rate = config.canary.sample_rate;
    if !(0.0..=1.0).contains(&rate) {
        errors.push(ValidationError::new("canary.sample_rate", format!("{rate} is outside 0.0..=1.0")));
    }

    if config.source.enabled {
        if config.source.directories.is_empty() {
            errors.push(ValidationError::new(
                "source.directories",
                "at least one directory is required when the source poller is enabled",
            ));
        }
        if config.source.extension.trim_start_matches('.').is_empty() {
            errors.push(ValidationError::new("source.extension", "must not be empty"));
        }
        let mut seen = HashSet::new();
        for dir in &config.source.directories {
            if !seen.insert(&dir.path) {
                errors.push(ValidationError::new(
                    "source.directories",
                    format!("'{}' is listed more than once", dir.path.display()),
                ));
            }
        }
    }

    if config.store.author.trim().is_empty() {
        errors.push(ValidationError::new("store.author", "must not be empty"));
    }

    if config.observability.metrics_enabled {
        check_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::SourceDirectoryConfig;
    use crate::filters::FilterType;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = GatewayConfig::default();
        config.poller.interval_secs = 0;
        config.canary.sample_rate = 1.5;
        config.listener.bind_address = "nowhere".into();
        config.source.enabled = true;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "poller.interval_secs",
                "canary.sample_rate",
                "source.directories"
            ]
        );
    }

    #[test]
    fn test_duplicate_directory() {
        let mut config = GatewayConfig::default();
        config.source.enabled = true;
        let dir = SourceDirectoryConfig {
            path: "filters/pre".into(),
            filter_type: FilterType::Pre,
        };
        config.source.directories = vec![dir.clone(), dir];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("more than once"));
    }
}
