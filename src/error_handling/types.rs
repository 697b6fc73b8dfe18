use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::session_management::LifecycleState;

/// Error taxonomy recorded on failed sessions and history records.
///
/// This is the serialisable view of every error the engine can surface; the
/// richer error enums below carry context and map onto one of these kinds
/// through their `kind()` method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Unreachable,
    Timeout,
    ProtocolError,
    Disconnected,
    NotFound,
    Conflict,
    Cancelled,
    Interrupted,
    ValidationError,
    IncompleteCapture,
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Unreachable => "Unreachable",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::Disconnected => "Disconnected",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Interrupted => "Interrupted",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::IncompleteCapture => "IncompleteCapture",
            ErrorKind::Storage => "Storage",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session {id} not found in {bucket}")]
    NotFound { id: Uuid, bucket: LifecycleState },
    #[error("Session {id} already present in {bucket}")]
    Conflict { id: Uuid, bucket: LifecycleState },
    #[error("Session {id} is being moved by another caller")]
    ClaimBusy { id: Uuid },
    #[error("Transition {from} -> {to} is not allowed")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("Invalid session record: {0}")]
    Validation(String),
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Conflict { .. } | StoreError::ClaimBusy { .. } => ErrorKind::Conflict,
            StoreError::InvalidTransition { .. } | StoreError::Validation(_) => {
                ErrorKind::ValidationError
            }
            StoreError::Io(_) | StoreError::Serialization(_) => ErrorKind::Storage,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device unreachable: {0}")]
    Unreachable(String),
    #[error("Device operation `{operation}` timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("Device protocol error: {0}")]
    Protocol(String),
    #[error("Device command {cmd} rejected with code {code}")]
    Rejected { cmd: u32, code: i32 },
    #[error("Device disconnected: {0}")]
    Disconnected(String),
    #[error("Device is not connected")]
    NotConnected,
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Unreachable(_) => ErrorKind::Unreachable,
            DeviceError::Timeout { .. } => ErrorKind::Timeout,
            DeviceError::Protocol(_) | DeviceError::Rejected { .. } => ErrorKind::ProtocolError,
            DeviceError::Disconnected(_) | DeviceError::NotConnected => ErrorKind::Disconnected,
        }
    }

    /// Errors after which a reconnect and a single retry are worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeviceError::Disconnected(_) | DeviceError::NotConnected
        )
    }
}

impl From<serde_json::Error> for DeviceError {
    fn from(err: serde_json::Error) -> Self {
        DeviceError::Protocol(format!("malformed frame: {}", err))
    }
}

impl From<reqwest::Error> for DeviceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeviceError::Timeout {
                operation: "http request",
                after: Duration::ZERO,
            }
        } else if err.is_connect() {
            DeviceError::Unreachable(err.to_string())
        } else if err.is_decode() || err.is_status() {
            DeviceError::Protocol(err.to_string())
        } else {
            DeviceError::Disconnected(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
    #[error("Scheduler task failed: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("Invalid bind address: {0}")]
    BadAddress(String),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigError),
    #[error("Session store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] SchedulerError),
    #[error("Web interface error: {0}")]
    WebError(#[from] WebError),
}
