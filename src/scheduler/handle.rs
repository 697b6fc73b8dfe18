use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::recovery;
use super::types::{lock, InFlight, InFlightSlot, SchedulerEvent, ShutdownOutcome};
use crate::error_handling::types::{SchedulerError, StoreError};
use crate::storage::SessionStore;

/// Control side of a spawned scheduler.
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    in_flight: InFlightSlot,
    events: broadcast::Sender<SchedulerEvent>,
    store: Arc<dyn SessionStore>,
    deadline: Duration,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub(crate) fn new(
        shutdown: CancellationToken,
        in_flight: InFlightSlot,
        events: broadcast::Sender<SchedulerEvent>,
        store: Arc<dyn SessionStore>,
        deadline: Duration,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            shutdown,
            in_flight,
            events,
            store,
            deadline,
            task,
        }
    }

    /// Session currently being executed, if any.
    pub fn status(&self) -> Option<InFlight> {
        *lock(&self.in_flight)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop.
    ///
    /// The pipeline stops at its next state boundary and the session is
    /// committed as usual. If that takes longer than the shutdown deadline,
    /// the loop is aborted and the in-flight session is failed as
    /// `Interrupted`.
    pub async fn shutdown(mut self) -> Result<ShutdownOutcome, SchedulerError> {
        info!("Scheduler shutdown requested (deadline {:?})", self.deadline);
        self.shutdown.cancel();

        match tokio::time::timeout(self.deadline, &mut self.task).await {
            Ok(Ok(())) => Ok(ShutdownOutcome::Drained),
            Ok(Err(e)) => Err(SchedulerError::Join(e.to_string())),
            Err(_) => {
                warn!("Shutdown deadline elapsed, aborting the scheduler");
                self.task.abort();
                let _ = (&mut self.task).await;

                let interrupted = lock(&self.in_flight).take();
                if let Some(current) = interrupted {
                    match recovery::fail_interrupted(
                        self.store.as_ref(),
                        current.id,
                        current.state,
                        Some(current.started_at),
                        "shutdown deadline elapsed",
                    ) {
                        Ok(()) => {}
                        // committed just before the abort
                        Err(StoreError::NotFound { .. }) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(ShutdownOutcome::Interrupted(interrupted.map(|c| c.id)))
            }
        }
    }
}
