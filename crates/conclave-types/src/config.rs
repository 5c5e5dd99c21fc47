//! Configuration types for Conclave.
//!
//! `ConclaveConfig` represents the top-level `config.toml` that tunes the
//! orchestration engine, the HTTP server and the model gateway.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.conclave/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConclaveConfig {
    /// Bot that receives messages without an explicit @-mention.
    #[serde(default = "default_coordinator_bot")]
    pub coordinator_bot: String,

    /// Maximum delegation depth before a dispatch is refused.
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: u32,

    /// Self-reported confidence below which a response is escalated.
    #[serde(default = "default_escalation_confidence_threshold")]
    pub escalation_confidence_threshold: f32,

    /// Number of recent messages included in a subscription snapshot.
    #[serde(default = "default_snapshot_message_limit")]
    pub snapshot_message_limit: u32,

    /// Events kept per room for `resume`.
    #[serde(default = "default_replay_buffer_size")]
    pub replay_buffer_size: usize,

    /// Capacity of each room's broadcast channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Recent turns handed to the model as context.
    #[serde(default = "default_prior_turns")]
    pub prior_turns: u32,

    /// Client event ids remembered per room to drop redelivered inbound events.
    #[serde(default = "default_inbound_dedup_window")]
    pub inbound_dedup_window: usize,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub invoker: InvokerConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_coordinator_bot() -> String {
    "lead".to_string()
}

fn default_max_delegation_depth() -> u32 {
    4
}

fn default_escalation_confidence_threshold() -> f32 {
    0.5
}

fn default_snapshot_message_limit() -> u32 {
    200
}

fn default_replay_buffer_size() -> usize {
    512
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_prior_turns() -> u32 {
    20
}

fn default_inbound_dedup_window() -> usize {
    256
}

impl Default for ConclaveConfig {
    fn default() -> Self {
        Self {
            coordinator_bot: default_coordinator_bot(),
            max_delegation_depth: default_max_delegation_depth(),
            escalation_confidence_threshold: default_escalation_confidence_threshold(),
            snapshot_message_limit: default_snapshot_message_limit(),
            replay_buffer_size: default_replay_buffer_size(),
            event_channel_capacity: default_event_channel_capacity(),
            prior_turns: default_prior_turns(),
            inbound_dedup_window: default_inbound_dedup_window(),
            server: ServerConfig::default(),
            invoker: InvokerConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3417
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// `[invoker]` section: the model gateway bots are invoked through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Gateway URL. Without it every invocation fails with an
    /// invocation-failure system message.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Per-invocation timeout enforced by the gateway client.
    #[serde(default = "default_invoker_timeout_secs")]
    pub timeout_secs: u64,
    /// Gateway URL for tool execution. Defaults to `{endpoint}/tools`.
    #[serde(default)]
    pub tool_endpoint: Option<String>,
}

fn default_invoker_timeout_secs() -> u64 {
    120
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_invoker_timeout_secs(),
            tool_endpoint: None,
        }
    }
}

/// `[telemetry]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Export spans through OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = ConclaveConfig::default();
        assert_eq!(config.coordinator_bot, "lead");
        assert_eq!(config.max_delegation_depth, 4);
        assert_eq!(config.escalation_confidence_threshold, 0.5);
        assert_eq!(config.server.port, 3417);
        assert!(config.invoker.endpoint.is_none());
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: ConclaveConfig = toml::from_str("").unwrap();
        assert_eq!(config, ConclaveConfig::default());
    }

    #[test]
    fn test_config_deserialize_with_values() {
        let toml_str = r#"
coordinator_bot = "researcher"
max_delegation_depth = 2

[server]
port = 9000

[invoker]
endpoint = "http://127.0.0.1:8088/invoke"
"#;
        let config: ConclaveConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.coordinator_bot, "researcher");
        assert_eq!(config.max_delegation_depth, 2);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.invoker.timeout_secs, 120);
        assert_eq!(config.snapshot_message_limit, 200);
    }
}
