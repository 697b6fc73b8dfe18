use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_handling::types::{ErrorKind, StoreError};
use crate::execution::PipelineState;
use crate::session_management::LifecycleState;

/// Target position, both values in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub ra: f64,
    pub dec: f64,
}

/// Capture parameters, passed through untouched to the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    pub frame_count: u32,
    pub exposure_secs: f64,
    #[serde(default)]
    pub gain: u32,
    #[serde(default = "default_binning")]
    pub binning: u8,
}

fn default_binning() -> u8 {
    1
}

/// Which optional steps to run before capturing, and how long to wait.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationSettings {
    #[serde(default)]
    pub auto_focus: bool,
    #[serde(default)]
    pub plate_solve: bool,
    /// Focus to infinity instead of running a star-based autofocus.
    #[serde(default)]
    pub infinite_focus: bool,
    /// Guide on a star for the duration of the capture.
    #[serde(default)]
    pub auto_guide: bool,
    /// Pause after a successful goto so the mount can settle.
    #[serde(default)]
    pub settling_secs: u64,
    /// Outer bound on each optional calibration/focus step.
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepOutcome {
    Success,
    Failed { kind: ErrorKind, message: String },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success)
    }
}

/// One entry of a session's execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub state: PipelineState,
    pub outcome: StepOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Why a session ended up in Failed, and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub state: PipelineState,
    pub kind: ErrorKind,
    pub message: String,
}

/// A single observation request.
///
/// The lifecycle state is not serialized: it is derived from the bucket the
/// record is loaded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub target_name: String,
    pub start_time: DateTime<Utc>,
    pub coordinates: Coordinates,
    pub capture: CaptureSettings,
    #[serde(default)]
    pub calibration: CalibrationSettings,
    #[serde(skip)]
    pub state: LifecycleState,
    #[serde(default)]
    pub execution_log: Vec<StepRecord>,
    #[serde(default)]
    pub failure: Option<FailureInfo>,
}

impl Session {
    pub fn new(
        target_name: impl Into<String>,
        start_time: DateTime<Utc>,
        coordinates: Coordinates,
        capture: CaptureSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_name: target_name.into(),
            start_time,
            coordinates,
            capture,
            calibration: CalibrationSettings::default(),
            state: LifecycleState::Available,
            execution_log: Vec::new(),
            failure: None,
        }
    }

    pub fn with_calibration(mut self, calibration: CalibrationSettings) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now
    }

    /// Checks the fields the scheduler and the device rely on.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.target_name.trim().is_empty() {
            return Err(StoreError::Validation("target name is blank".into()));
        }
        let Coordinates { ra, dec } = self.coordinates;
        if !(0.0..360.0).contains(&ra) {
            return Err(StoreError::Validation(format!(
                "right ascension {} outside [0, 360)",
                ra
            )));
        }
        if !(-90.0..=90.0).contains(&dec) {
            return Err(StoreError::Validation(format!(
                "declination {} outside [-90, 90]",
                dec
            )));
        }
        if self.capture.frame_count == 0 {
            return Err(StoreError::Validation("frame count is zero".into()));
        }
        if !(self.capture.exposure_secs > 0.0) {
            return Err(StoreError::Validation(format!(
                "exposure {} must be positive",
                self.capture.exposure_secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session() -> Session {
        Session::new(
            "M31",
            Utc::now(),
            Coordinates {
                ra: 10.68,
                dec: 41.27,
            },
            CaptureSettings {
                frame_count: 10,
                exposure_secs: 15.0,
                gain: 80,
                binning: 1,
            },
        )
    }

    #[test]
    fn valid_session_passes() {
        assert!(session().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let mut s = session();
        s.coordinates.ra = 360.0;
        assert!(s.validate().is_err());

        let mut s = session();
        s.coordinates.dec = -90.5;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_empty_capture() {
        let mut s = session();
        s.capture.frame_count = 0;
        assert!(matches!(s.validate(), Err(StoreError::Validation(_))));

        let mut s = session();
        s.capture.exposure_secs = f64::NAN;
        assert!(s.validate().is_err());
    }

    #[test]
    fn due_once_start_time_has_passed() {
        let now = Utc::now();
        let mut s = session();
        s.start_time = now + Duration::minutes(5);
        assert!(!s.is_due(now));
        s.start_time = now;
        assert!(s.is_due(now));
    }

    #[test]
    fn state_is_not_serialized() {
        let mut s = session();
        s.state = LifecycleState::Running;
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("Running"));
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, LifecycleState::Available);
    }
}
