//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root configuration for the ledger client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Connection presets and endpoint selection.
    pub connection: ConnectionConfig,

    /// Message delivery retry budget.
    pub message: MessageConfig,

    /// Subscription polling and expiry tolerance.
    pub subscriptions: SubscriptionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Group id of the preset to connect to.
    pub selected: String,

    /// Time allowed for a single candidate endpoint to answer the probe.
    pub connect_timeout_secs: u64,

    /// Known presets.
    pub presets: Vec<ConnectionPreset>,

    /// Health check settings for the active connection.
    pub health_check: HealthCheckConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            selected: "mainnet".to_string(),
            connect_timeout_secs: 10,
            presets: Vec::new(),
            health_check: HealthCheckConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Look up a preset by group id.
    pub fn preset(&self, group: &str) -> Option<&ConnectionPreset> {
        self.presets.iter().find(|p| p.group == group)
    }

    /// The preset named by `selected`.
    pub fn selected_preset(&self) -> Option<&ConnectionPreset> {
        self.preset(&self.selected)
    }
}

/// Transport protocol spoken by a preset's endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Jrpc,
    Proto,
    Graphql,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolKind::Jrpc => "jrpc",
            ProtocolKind::Proto => "proto",
            ProtocolKind::Graphql => "graphql",
        };
        f.write_str(name)
    }
}

/// A named group of interchangeable endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionPreset {
    /// Preset identifier (e.g., "mainnet").
    pub group: String,

    /// Protocol kind shared by all endpoints.
    pub kind: ProtocolKind,

    /// Candidate endpoints, tried in order.
    pub endpoints: Vec<EndpointConfig>,
}

/// A single candidate endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Endpoint URL.
    pub url: String,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 10,
            unhealthy_threshold: 1,
            healthy_threshold: 1,
        }
    }
}

/// Message delivery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MessageConfig {
    /// Number of network delivery attempts before falling back to local execution.
    pub retry_count: u32,

    /// Expiration timeout of the first attempt in seconds.
    pub timeout_secs: u32,

    /// Multiplier applied to the timeout after every expired attempt.
    pub timeout_grow_factor: f64,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            retry_count: 5,
            timeout_secs: 60,
            timeout_grow_factor: 1.2,
        }
    }
}

/// Subscription configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Polling interval for transports without push support, in milliseconds.
    pub poll_interval_ms: u64,

    /// Tolerance past a message's expiration before it is declared expired.
    pub expiry_grace_secs: u64,

    /// Default page size for history and code hash lookups.
    pub history_page_size: u8,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            expiry_grace_secs: 5,
            history_page_size: 50,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.message.retry_count, 5);
        assert_eq!(config.message.timeout_secs, 60);
        assert_eq!(config.message.timeout_grow_factor, 1.2);
        assert_eq!(config.subscriptions.history_page_size, 50);
        assert_eq!(config.connection.health_check.unhealthy_threshold, 1);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            [connection]
            selected = "testnet"

            [[connection.presets]]
            group = "testnet"
            kind = "jrpc"
            endpoints = [{ url = "https://a.example" }, { url = "https://b.example" }]

            [message]
            retry_count = 2
            "#,
        )
        .unwrap();

        let preset = config.connection.selected_preset().unwrap();
        assert_eq!(preset.kind, ProtocolKind::Jrpc);
        assert_eq!(preset.endpoints.len(), 2);
        assert_eq!(config.message.retry_count, 2);
        assert_eq!(config.message.timeout_secs, 60);
    }
}
