//! Control channel — tagged JSON multiplexed as text frames on the same
//! transport as binary snapshots.
//!
//! Each text frame is one message with a `type` discriminator. Unknown
//! types must be ignored by both sides (deserialization fails; the caller
//! logs at debug and moves on). Versioning is additive only.

use serde::{Deserialize, Serialize};

/// Messages the server produces and a client must understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerControl {
    /// Permits binary traffic to begin — the readiness handshake.
    #[serde(rename = "connection_established")]
    ConnectionEstablished { timestamp: u64 },

    /// Physics-driven updates are inhibited; client should show progress.
    #[serde(rename = "loading")]
    Loading { message: String },

    /// Updates are now flowing.
    #[serde(rename = "updatesStarted")]
    UpdatesStarted { timestamp: u64 },

    /// Authoritative single-setting change.
    #[serde(rename = "settings")]
    Settings {
        category: String,
        setting: String,
        value: serde_json::Value,
    },
}

/// Messages a client produces and the server must understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientControl {
    /// Request a one-shot snapshot and enter streaming mode.
    #[serde(rename = "requestInitialData")]
    RequestInitialData,

    /// Gate server-side reseeding.
    #[serde(rename = "enableRandomization")]
    EnableRandomization { enabled: bool },

    /// Pause or resume physics.
    #[serde(rename = "pauseSimulation")]
    PauseSimulation { enabled: bool },

    /// Request one extra kernel tick ahead of the next scheduled one.
    #[serde(rename = "applyForces")]
    ApplyForces {
        timestamp: u64,
        #[serde(rename = "forceCalculation")]
        force_calculation: bool,
    },

    /// Proposed single-setting change. Rejected values keep the previous
    /// setting and are answered with an authoritative `settings` message.
    #[serde(rename = "settings_update")]
    SettingsUpdate {
        category: String,
        setting: String,
        value: serde_json::Value,
    },
}

impl ServerControl {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ClientControl {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Wall-clock milliseconds for control message timestamps.
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_established_round_trip() {
        let msg = ServerControl::ConnectionEstablished { timestamp: 1_700_000_000_000 };
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"connection_established""#));

        match ServerControl::from_json(&json).unwrap() {
            ServerControl::ConnectionEstablished { timestamp } => {
                assert_eq!(timestamp, 1_700_000_000_000);
            }
            other => panic!("expected ConnectionEstablished, got {other:?}"),
        }
    }

    #[test]
    fn request_initial_data_is_bare() {
        let msg = ClientControl::RequestInitialData;
        assert_eq!(msg.to_json().unwrap(), r#"{"type":"requestInitialData"}"#);
        assert!(matches!(
            ClientControl::from_json(r#"{"type":"requestInitialData"}"#).unwrap(),
            ClientControl::RequestInitialData
        ));
    }

    #[test]
    fn apply_forces_uses_camel_case_field() {
        let msg = ClientControl::ApplyForces { timestamp: 42, force_calculation: true };
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""forceCalculation":true"#));

        match ClientControl::from_json(&json).unwrap() {
            ClientControl::ApplyForces { timestamp, force_calculation } => {
                assert_eq!(timestamp, 42);
                assert!(force_calculation);
            }
            other => panic!("expected ApplyForces, got {other:?}"),
        }
    }

    #[test]
    fn settings_round_trip_preserves_value() {
        let msg = ClientControl::SettingsUpdate {
            category: "physics".into(),
            setting: "damping".into(),
            value: serde_json::json!(0.9),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"settings_update""#));

        match ClientControl::from_json(&json).unwrap() {
            ClientControl::SettingsUpdate { category, setting, value } => {
                assert_eq!(category, "physics");
                assert_eq!(setting, "damping");
                assert_eq!(value, serde_json::json!(0.9));
            }
            other => panic!("expected SettingsUpdate, got {other:?}"),
        }
    }

    #[test]
    fn pause_and_randomization_flags() {
        let json = r#"{"type":"pauseSimulation","enabled":true}"#;
        assert!(matches!(
            ClientControl::from_json(json).unwrap(),
            ClientControl::PauseSimulation { enabled: true }
        ));

        let json = r#"{"type":"enableRandomization","enabled":false}"#;
        assert!(matches!(
            ClientControl::from_json(json).unwrap(),
            ClientControl::EnableRandomization { enabled: false }
        ));
    }

    #[test]
    fn unknown_type_fails_so_callers_can_ignore() {
        assert!(ClientControl::from_json(r#"{"type":"fisheye","enabled":true}"#).is_err());
        assert!(ServerControl::from_json(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn missing_type_fails() {
        assert!(ClientControl::from_json(r#"{"enabled":true}"#).is_err());
    }

    #[test]
    fn type_tag_leads_the_object() {
        let json = ServerControl::Loading { message: "building graph".into() }
            .to_json()
            .unwrap();
        assert!(json.starts_with(r#"{"type":"#));
    }
}
