//! Session management core module.
//!
//! This module provides the core types describing observation sessions: the
//! lifecycle state (which doubles as the storage bucket), the session record
//! itself and the history records written when a session terminates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Submodule for history records and derived statistics.
pub mod history;
/// Submodule for session data structures and validation.
pub mod session;

pub use history::{HistoryRecord, HistoryStats, StepSummary};
pub use session::{
    CalibrationSettings, CaptureSettings, Coordinates, FailureInfo, Session, StepOutcome,
    StepRecord,
};

/// Lifecycle state of a session.
///
/// Bucket membership on disk *is* the lifecycle state: a session stored under
/// `ToDo/` is queued, one under `Running/` is owned by the scheduler.
///
/// Variants:
/// - `Available`: editable, not scheduled.
/// - `ToDo`: queued, immutable to editors.
/// - `Running`: currently executing, exclusively owned by the scheduler.
/// - `Done`: terminal, every mandatory step succeeded.
/// - `Failed`: terminal, a mandatory step failed, or the run was cancelled or interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum LifecycleState {
    #[default]
    Available,
    ToDo,
    Running,
    Done,
    Failed,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 5] = [
        LifecycleState::Available,
        LifecycleState::ToDo,
        LifecycleState::Running,
        LifecycleState::Done,
        LifecycleState::Failed,
    ];

    /// Directory name of the bucket holding sessions in this state.
    pub fn dir_name(self) -> &'static str {
        match self {
            LifecycleState::Available => "Available",
            LifecycleState::ToDo => "ToDo",
            LifecycleState::Running => "Running",
            LifecycleState::Done => "Done",
            LifecycleState::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Done | LifecycleState::Failed)
    }

    /// Whether `self -> to` is one of the allowed lifecycle transitions.
    ///
    /// Running is only entered from ToDo and only left towards a terminal
    /// state; terminal states never move again.
    pub fn can_transition_to(self, to: LifecycleState) -> bool {
        matches!(
            (self, to),
            (LifecycleState::Available, LifecycleState::ToDo)
                | (LifecycleState::ToDo, LifecycleState::Available)
                | (LifecycleState::ToDo, LifecycleState::Running)
                | (LifecycleState::Running, LifecycleState::Done)
                | (LifecycleState::Running, LifecycleState::Failed)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LifecycleState::ALL
            .iter()
            .copied()
            .find(|state| state.dir_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown bucket `{}`", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_is_entered_only_from_todo() {
        for from in LifecycleState::ALL {
            let allowed = from.can_transition_to(LifecycleState::Running);
            assert_eq!(allowed, from == LifecycleState::ToDo, "from {}", from);
        }
    }

    #[test]
    fn running_never_returns_to_queue() {
        assert!(!LifecycleState::Running.can_transition_to(LifecycleState::ToDo));
        assert!(!LifecycleState::Running.can_transition_to(LifecycleState::Available));
        assert!(LifecycleState::Running.can_transition_to(LifecycleState::Failed));
    }

    #[test]
    fn terminal_states_are_final() {
        for to in LifecycleState::ALL {
            assert!(!LifecycleState::Done.can_transition_to(to));
            assert!(!LifecycleState::Failed.can_transition_to(to));
        }
    }

    #[test]
    fn parse_bucket_names() {
        assert_eq!("todo".parse::<LifecycleState>(), Ok(LifecycleState::ToDo));
        assert_eq!("Failed".parse::<LifecycleState>(), Ok(LifecycleState::Failed));
        assert!("History".parse::<LifecycleState>().is_err());
    }
}
