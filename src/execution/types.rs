use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::ModeUsed;
use crate::session_management::{FailureInfo, LifecycleState, StepRecord};

/// States of one pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Connecting,
    Calibrating,
    SlewToTarget,
    AutoFocusing,
    Capturing,
    Disconnecting,
    Complete,
    Aborted,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Connecting => "Connecting",
            PipelineState::Calibrating => "Calibrating",
            PipelineState::SlewToTarget => "SlewToTarget",
            PipelineState::AutoFocusing => "AutoFocusing",
            PipelineState::Capturing => "Capturing",
            PipelineState::Disconnecting => "Disconnecting",
            PipelineState::Complete => "Complete",
            PipelineState::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Done,
    /// Carries the first failing state and its error.
    Failed(FailureInfo),
}

/// Outcome of one pipeline run, handed back to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub verdict: Verdict,
    /// Steps that ran, in order. Skipped optional steps and the final
    /// disconnect are not listed.
    pub steps: Vec<StepRecord>,
    /// Whether the closing disconnect succeeded.
    pub released: bool,
    pub frames_captured: u32,
    pub mode_used: Option<ModeUsed>,
}

impl PipelineReport {
    pub fn final_state(&self) -> LifecycleState {
        match self.verdict {
            Verdict::Done => LifecycleState::Done,
            Verdict::Failed(_) => LifecycleState::Failed,
        }
    }

    pub fn failure(&self) -> Option<&FailureInfo> {
        match &self.verdict {
            Verdict::Done => None,
            Verdict::Failed(info) => Some(info),
        }
    }
}

/// Receives progress while a pipeline runs. Both hooks default to no-ops.
pub trait PipelineObserver: Send {
    fn state_entered(&mut self, _state: PipelineState) {}
    fn step_finished(&mut self, _step: &StepRecord) {}
}

impl PipelineObserver for () {}
