//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that the selected preset exists and preset groups are unique
//! - Validate value ranges (timeouts > 0, endpoints parse as URLs)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::ClientConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let connection = &config.connection;

    let mut groups = HashSet::new();
    for (i, preset) in connection.presets.iter().enumerate() {
        let field = format!("connection.presets[{}]", i);
        if preset.group.is_empty() {
            errors.push(ValidationError::new(&field, "group must not be empty"));
        }
        if !groups.insert(preset.group.as_str()) {
            errors.push(ValidationError::new(
                &field,
                format!("duplicate group '{}'", preset.group),
            ));
        }
        if preset.endpoints.is_empty() {
            errors.push(ValidationError::new(&field, "at least one endpoint is required"));
        }
        for (j, endpoint) in preset.endpoints.iter().enumerate() {
            if let Err(e) = url::Url::parse(&endpoint.url) {
                errors.push(ValidationError::new(
                    format!("{}.endpoints[{}]", field, j),
                    format!("invalid url '{}': {}", endpoint.url, e),
                ));
            }
        }
    }

    if connection.selected_preset().is_none() {
        errors.push(ValidationError::new(
            "connection.selected",
            format!("unknown preset '{}'", connection.selected),
        ));
    }
    if connection.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("connection.connect_timeout_secs", "must be > 0"));
    }

    let health = &connection.health_check;
    if health.enabled && health.interval_secs == 0 {
        errors.push(ValidationError::new("connection.health_check.interval_secs", "must be > 0"));
    }
    if health.enabled && health.timeout_secs == 0 {
        errors.push(ValidationError::new("connection.health_check.timeout_secs", "must be > 0"));
    }

    let factor = config.message.timeout_grow_factor;
    if !factor.is_finite() || factor <= 0.0 {
        errors.push(ValidationError::new(
            "message.timeout_grow_factor",
            format!("must be a positive number, got {}", factor),
        ));
    }

    if config.subscriptions.poll_interval_ms == 0 {
        errors.push(ValidationError::new("subscriptions.poll_interval_ms", "must be > 0"));
    }
    if config.subscriptions.history_page_size == 0 {
        errors.push(ValidationError::new("subscriptions.history_page_size", "must be > 0"));
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
    use crate::config::schema::{ConnectionPreset, EndpointConfig, ProtocolKind};

    fn valid_config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.connection.selected = "mainnet".to_string();
        config.connection.presets.push(ConnectionPreset {
            group: "mainnet".to_string(),
            kind: ProtocolKind::Jrpc,
            endpoints: vec![EndpointConfig {
                url: "https://jrpc.example".to_string(),
            }],
        });
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_unknown_selected_preset() {
        let mut config = valid_config();
        config.connection.selected = "devnet".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "connection.selected");
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = valid_config();
        config.connection.presets.push(ConnectionPreset {
            group: "mainnet".to_string(),
            kind: ProtocolKind::Jrpc,
            endpoints: vec![EndpointConfig {
                url: "not a url".to_string(),
            }],
        });
        config.message.timeout_grow_factor = f64::NAN;
        config.subscriptions.poll_interval_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"connection.presets[1]"));
        assert!(fields.contains(&"connection.presets[1].endpoints[0]"));
        assert!(fields.contains(&"message.timeout_grow_factor"));
        assert!(fields.contains(&"subscriptions.poll_interval_ms"));
    }
}
