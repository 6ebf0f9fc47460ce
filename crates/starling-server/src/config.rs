//! Server configuration.
//!
//! Every recognised option is named here with its default; unknown keys are
//! deserialization errors, never silently accepted. Settings load from an
//! optional JSON file (`STARLING_SETTINGS`) with per-field defaults, and
//! the bind address comes from `STARLING_BIND`.

use serde::{Deserialize, Serialize};
use starling_graph::PhysicsParams;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub physics: PhysicsParams,
    pub transport: TransportSettings,
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportSettings {
    /// Messages allowed per rate window. Over-budget messages queue, they
    /// are not dropped.
    #[serde(rename = "messageRateLimit")]
    pub message_rate_limit: u32,
    /// Rate window length, milliseconds.
    #[serde(rename = "messageTimeWindow")]
    pub message_time_window_ms: u64,
    /// Inbound frames larger than this are dropped; the session lives on.
    #[serde(rename = "maxMessageSize")]
    pub max_message_size: usize,
    /// Outbound queue bound, items.
    #[serde(rename = "maxQueueSize")]
    pub max_queue_size: usize,
    /// Client reconnect attempt cap.
    #[serde(rename = "maxRetries")]
    pub max_retries: u32,
    /// Client reconnect base delay, milliseconds.
    #[serde(rename = "retryDelay")]
    pub retry_delay_ms: u64,
    /// Frame bodies at or below this many bytes skip compression.
    #[serde(rename = "compressionThreshold")]
    pub compression_threshold: usize,
    /// WebSocket ping cadence, milliseconds.
    #[serde(rename = "heartbeatInterval")]
    pub heartbeat_interval_ms: u64,
    /// Close a session after this long without any inbound traffic.
    #[serde(rename = "heartbeatTimeout")]
    pub heartbeat_timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings {
            message_rate_limit: 60,
            message_time_window_ms: 1000,
            max_message_size: 100 * 1024 * 1024,
            max_queue_size: 100,
            max_retries: 5,
            retry_delay_ms: 1000,
            compression_threshold: 1024,
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationSettings {
    /// Snapshot emission rate, Hz. Clamped to 1..=120 on load.
    pub update_rate: u32,
    /// Sphere radius used by the one-shot reseed.
    pub randomize_radius: f32,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        SimulationSettings { update_rate: 60, randomize_radius: 5.0 }
    }
}

impl Settings {
    /// Load settings: `STARLING_SETTINGS` names a JSON file, otherwise
    /// defaults. A malformed file is an error — a typo'd key must not
    /// silently fall back to defaults.
    pub fn load() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut settings = match std::env::var("STARLING_SETTINGS") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)?;
                let parsed: Settings = serde_json::from_str(&raw)?;
                tracing::info!(%path, "config: loaded settings file");
                parsed
            }
            Err(_) => Settings::default(),
        };
        settings.simulation.update_rate = settings.simulation.update_rate.clamp(1, 120);
        Ok(settings)
    }

    /// Interval between snapshot emissions.
    pub fn snapshot_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.simulation.update_rate.clamp(1, 120) as f64)
    }
}

/// Server bind address: `STARLING_BIND`, or all interfaces on 8080.
pub fn bind_addr() -> String {
    std::env::var("STARLING_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_recognised_options() {
        let s = Settings::default();
        assert_eq!(s.transport.message_rate_limit, 60);
        assert_eq!(s.transport.message_time_window_ms, 1000);
        assert_eq!(s.transport.max_queue_size, 100);
        assert_eq!(s.transport.max_retries, 5);
        assert_eq!(s.transport.compression_threshold, 1024);
        assert_eq!(s.simulation.update_rate, 60);
        assert_eq!(s.physics.damping, 0.85);
    }

    #[test]
    fn unknown_keys_are_errors() {
        let err = serde_json::from_str::<Settings>(r#"{"fisheye":{"enabled":true}}"#);
        assert!(err.is_err());

        let err = serde_json::from_str::<Settings>(
            r#"{"transport":{"maxQueueSise":10}}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn partial_settings_fill_defaults() {
        let s: Settings = serde_json::from_str(
            r#"{"transport":{"messageRateLimit":10},"simulation":{"update_rate":30}}"#,
        )
        .unwrap();
        assert_eq!(s.transport.message_rate_limit, 10);
        assert_eq!(s.transport.max_queue_size, 100);
        assert_eq!(s.simulation.update_rate, 30);
    }

    #[test]
    fn snapshot_interval_follows_update_rate() {
        let mut s = Settings::default();
        s.simulation.update_rate = 20;
        assert_eq!(s.snapshot_interval(), std::time::Duration::from_millis(50));
    }
}
