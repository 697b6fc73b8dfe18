use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::execution::PipelineState;
use crate::session_management::{LifecycleState, StepRecord};

/// Result of one scheduler iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing due.
    Idle,
    /// A session is already in Running.
    Busy,
    /// The chosen session was moved away before it could be claimed.
    Raced { id: Uuid },
    Completed { id: Uuid, state: LifecycleState },
}

/// Progress notifications for observers such as the status surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SchedulerEvent {
    Claimed { id: Uuid, target_name: String },
    StepFinished { id: Uuid, step: StepRecord },
    Committed { id: Uuid, state: LifecycleState },
}

/// The session currently owned by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InFlight {
    pub id: Uuid,
    pub state: PipelineState,
    pub started_at: DateTime<Utc>,
}

pub(crate) type InFlightSlot = Arc<Mutex<Option<InFlight>>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The loop stopped on its own; any in-flight session was committed.
    Drained,
    /// The deadline elapsed; the in-flight session, if any, was failed as
    /// interrupted.
    Interrupted(Option<Uuid>),
}
