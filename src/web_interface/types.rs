use serde::Serialize;
use uuid::Uuid;

use crate::device::DeviceStatus;
use crate::session_management::{FailureInfo, LifecycleState, Session};

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub target_name: String,
    pub start_time: String, // RFC 3339
    pub state: LifecycleState,
    pub frame_count: u32,
    pub exposure_secs: f64,
    pub steps_recorded: usize,
    pub failure: Option<FailureInfo>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            target_name: session.target_name,
            start_time: session.start_time.to_rfc3339(),
            state: session.state,
            frame_count: session.capture.frame_count,
            exposure_secs: session.capture.exposure_secs,
            steps_recorded: session.execution_log.len(),
            failure: session.failure,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub device: DeviceStatus,
    pub running: Vec<SessionResponse>,
}
