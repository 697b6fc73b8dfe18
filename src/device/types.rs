use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::commands;

/// Transport the controller ended up using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeUsed {
    Protocol,
    Fallback,
}

impl fmt::Display for ModeUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeUsed::Protocol => f.write_str("protocol"),
            ModeUsed::Fallback => f.write_str("fallback"),
        }
    }
}

/// Device telemetry. Fields stay `None` until the device reports them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSnapshot {
    pub battery_percent: Option<u8>,
    pub storage_free_mb: Option<u64>,
    pub temperature_c: Option<f64>,
    pub focus_position: Option<i64>,
    /// Stream descriptor, typically the preview URL.
    pub stream: Option<String>,
}

impl StatusSnapshot {
    /// Overlays every field present in `other`.
    pub fn merge(&mut self, other: StatusSnapshot) {
        if other.battery_percent.is_some() {
            self.battery_percent = other.battery_percent;
        }
        if other.storage_free_mb.is_some() {
            self.storage_free_mb = other.storage_free_mb;
        }
        if other.temperature_c.is_some() {
            self.temperature_c = other.temperature_c;
        }
        if other.focus_position.is_some() {
            self.focus_position = other.focus_position;
        }
        if other.stream.is_some() {
            self.stream = other.stream;
        }
    }

    /// Applies a telemetry notification. Returns false for codes that carry
    /// no telemetry.
    pub fn apply_notification(&mut self, cmd: u32, data: &Value) -> bool {
        match cmd {
            commands::NOTIFY_BATTERY => {
                self.battery_percent = data
                    .get("percent")
                    .and_then(Value::as_u64)
                    .and_then(|p| u8::try_from(p).ok());
            }
            commands::NOTIFY_SD_CARD => {
                self.storage_free_mb = data.get("available_mb").and_then(Value::as_u64);
            }
            commands::NOTIFY_STREAM => {
                self.stream = data.get("url").and_then(Value::as_str).map(str::to_string);
            }
            commands::NOTIFY_FOCUS => {
                self.focus_position = data.get("position").and_then(Value::as_i64);
            }
            commands::NOTIFY_TEMPERATURE => {
                self.temperature_c = data.get("celsius").and_then(Value::as_f64);
            }
            _ => return false,
        }
        true
    }
}

/// What observers see: the last status the controller managed to read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub mode: Option<ModeUsed>,
    pub connected: bool,
    pub snapshot: Option<StatusSnapshot>,
    pub updated_at: DateTime<Utc>,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            mode: None,
            connected: false,
            snapshot: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GotoTarget {
    pub ra: f64,
    pub dec: f64,
    pub target_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSummary {
    pub frames_requested: u32,
    pub frames_captured: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notifications_update_matching_field_only() {
        let mut snapshot = StatusSnapshot::default();
        assert!(snapshot.apply_notification(commands::NOTIFY_BATTERY, &json!({"percent": 64})));
        assert!(snapshot.apply_notification(commands::NOTIFY_FOCUS, &json!({"position": -120})));
        assert!(!snapshot.apply_notification(commands::GOTO_DSO, &json!({})));

        assert_eq!(snapshot.battery_percent, Some(64));
        assert_eq!(snapshot.focus_position, Some(-120));
        assert_eq!(snapshot.temperature_c, None);
    }

    #[test]
    fn merge_keeps_known_values() {
        let mut snapshot = StatusSnapshot {
            battery_percent: Some(90),
            stream: Some("rtsp://192.168.4.1/tele".into()),
            ..Default::default()
        };
        snapshot.merge(StatusSnapshot {
            temperature_c: Some(4.5),
            ..Default::default()
        });
        assert_eq!(snapshot.battery_percent, Some(90));
        assert_eq!(snapshot.temperature_c, Some(4.5));
        assert!(snapshot.stream.is_some());
    }
}
