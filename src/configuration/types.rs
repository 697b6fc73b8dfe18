use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which device transport(s) the controller may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModePreference {
    /// Protocol mode first, plain HTTP fallback if it is unavailable.
    #[default]
    Auto,
    ProtocolOnly,
    FallbackOnly,
}

/// Network address and timeouts of the imaging device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub address: String,
    pub protocol_port: u16,
    pub http_port: u16,
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub goto_timeout_secs: u64,
    pub autofocus_timeout_secs: u64,
    pub calibrate_timeout_secs: u64,
    /// Added on top of `frame_count * exposure` for the capture deadline.
    pub capture_margin_secs: u64,
    /// Consecutive status timeouts before the connection is declared lost.
    pub status_timeout_threshold: u32,
    pub reconnect_attempts: u32,
    pub mode_preference: ModePreference,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: "192.168.4.1".to_string(),
            protocol_port: 9900,
            http_port: 80,
            connect_timeout_secs: 10,
            operation_timeout_secs: 30,
            goto_timeout_secs: 180,
            autofocus_timeout_secs: 300,
            calibrate_timeout_secs: 180,
            capture_margin_secs: 60,
            status_timeout_threshold: 3,
            reconnect_attempts: 1,
            mode_preference: ModePreference::Auto,
        }
    }
}

impl DeviceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn goto_timeout(&self) -> Duration {
        Duration::from_secs(self.goto_timeout_secs)
    }

    pub fn autofocus_timeout(&self) -> Duration {
        Duration::from_secs(self.autofocus_timeout_secs)
    }

    pub fn calibrate_timeout(&self) -> Duration {
        Duration::from_secs(self.calibrate_timeout_secs)
    }

    pub fn capture_margin(&self) -> Duration {
        Duration::from_secs(self.capture_margin_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    /// How long a graceful shutdown may wait for the in-flight session.
    pub shutdown_deadline_secs: u64,
    /// Fail sessions left in Running by a previous process before polling.
    pub recover_orphans: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            shutdown_deadline_secs: 30,
            recover_orphans: true,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: std::path::PathBuf,
    /// Done and Failed records that started longer ago than this are moved
    /// to `Archived/` at startup. Unset keeps everything in place.
    pub archive_after_days: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: std::path::PathBuf::from("Sessions"),
            archive_after_days: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
