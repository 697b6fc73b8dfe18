//! Session scheduling.
//!
//! One background loop polls the ToDo bucket, claims the earliest due
//! session, runs it through the execution pipeline and commits the outcome.
//! Never more than one session runs at a time.

pub mod control_loop;
pub mod handle;
pub mod recovery;
pub mod types;

pub use control_loop::Scheduler;
pub use handle::SchedulerHandle;
pub use types::{InFlight, PollOutcome, SchedulerEvent, ShutdownOutcome};
