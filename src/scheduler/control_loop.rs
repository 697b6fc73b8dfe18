use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::handle::SchedulerHandle;
use super::recovery;
use super::types::{lock, InFlight, InFlightSlot, PollOutcome, SchedulerEvent};
use crate::configuration::SchedulerConfig;
use crate::device::{Device, ModeUsed};
use crate::error_handling::types::{ErrorKind, SchedulerError, StoreError};
use crate::execution::{
    ExecutionPipeline, PipelineObserver, PipelineReport, PipelineState, Verdict,
};
use crate::session_management::{
    FailureInfo, HistoryRecord, LifecycleState, Session, StepOutcome, StepRecord,
};
use crate::storage::SessionStore;

const EVENT_CAPACITY: usize = 64;
const COMMIT_ATTEMPTS: u32 = 5;
const COMMIT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Forwards pipeline progress to the in-flight slot and the event channel.
struct ProgressRelay {
    id: Uuid,
    in_flight: InFlightSlot,
    events: broadcast::Sender<SchedulerEvent>,
}

impl PipelineObserver for ProgressRelay {
    fn state_entered(&mut self, state: PipelineState) {
        if matches!(state, PipelineState::Complete | PipelineState::Aborted) {
            return;
        }
        if let Some(current) = lock(&self.in_flight).as_mut() {
            current.state = state;
        }
    }

    fn step_finished(&mut self, step: &StepRecord) {
        let _ = self.events.send(SchedulerEvent::StepFinished {
            id: self.id,
            step: step.clone(),
        });
    }
}

/// Report for a claimed record that fails validation. The device is never
/// touched, so the failure is pinned to Connecting.
fn rejected(message: &str, kind: ErrorKind) -> PipelineReport {
    let now = Utc::now();
    let failure = FailureInfo {
        state: PipelineState::Connecting,
        kind,
        message: message.to_string(),
    };
    PipelineReport {
        verdict: Verdict::Failed(failure),
        steps: vec![StepRecord {
            state: PipelineState::Connecting,
            outcome: StepOutcome::Failed {
                kind,
                message: message.to_string(),
            },
            started_at: now,
            finished_at: now,
        }],
        released: true,
        frames_captured: 0,
        mode_used: None,
    }
}

/// The single background control loop.
///
/// Each iteration claims at most one due session, runs it to completion and
/// commits the outcome before looking at the queue again.
pub struct Scheduler {
    store: Arc<dyn SessionStore>,
    device: Box<dyn Device>,
    config: SchedulerConfig,
    connect_timeout: Duration,
    shutdown: CancellationToken,
    in_flight: InFlightSlot,
    events: broadcast::Sender<SchedulerEvent>,
    /// A finished run whose move out of Running failed; retried first.
    pending: Option<PendingCommit>,
}

/// Everything needed to commit a finished run.
struct PendingCommit {
    session: Session,
    final_state: LifecycleState,
    started_at: DateTime<Utc>,
    frames_captured: u32,
    mode_used: Option<ModeUsed>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn SessionStore>,
        device: Box<dyn Device>,
        config: SchedulerConfig,
        connect_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            device,
            config,
            connect_timeout,
            shutdown: CancellationToken::new(),
            in_flight: Arc::new(Mutex::new(None)),
            events,
            pending: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Token that stops the loop and cancels the pipeline between states.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn current(&self) -> Option<InFlight> {
        *lock(&self.in_flight)
    }

    pub fn recover_orphans(&self) -> Result<usize, SchedulerError> {
        Ok(recovery::recover_orphans(self.store.as_ref())?)
    }

    /// One scheduler iteration.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, SchedulerError> {
        if let Some(pending) = self.pending.take() {
            let id = pending.session.id;
            info!("[{}] Retrying commit to {}", id, pending.final_state);
            let state = self.finish(pending).await?;
            return Ok(PollOutcome::Completed { id, state });
        }

        if !self.store.list(LifecycleState::Running)?.is_empty() {
            debug!("A session is already running");
            return Ok(PollOutcome::Busy);
        }

        match self.store.quarantine_unreadable(LifecycleState::ToDo) {
            Ok(ids) if !ids.is_empty() => {
                warn!("{} unreadable queued session(s) moved to Failed", ids.len())
            }
            Ok(_) => {}
            Err(e) => warn!("Could not sweep unreadable queued sessions: {}", e),
        }

        let now = Utc::now();
        let Some(mut session) = self
            .store
            .list(LifecycleState::ToDo)?
            .into_iter()
            .find(|s| s.is_due(now))
        else {
            trace!("No session due");
            return Ok(PollOutcome::Idle);
        };
        let id = session.id;

        match self
            .store
            .move_session(id, LifecycleState::ToDo, LifecycleState::Running)
        {
            Ok(()) => {}
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::Conflict) => {
                warn!("[{}] Lost the claim race: {}", id, e);
                return Ok(PollOutcome::Raced { id });
            }
            Err(e) => return Err(e.into()),
        }
        session.state = LifecycleState::Running;

        let started_at = Utc::now();
        *lock(&self.in_flight) = Some(InFlight {
            id,
            state: PipelineState::Connecting,
            started_at,
        });
        info!("[{}] Claimed {} (due {})", id, session.target_name, session.start_time);
        let _ = self.events.send(SchedulerEvent::Claimed {
            id,
            target_name: session.target_name.clone(),
        });

        let report = match session.validate() {
            Ok(()) => {
                let mut relay = ProgressRelay {
                    id,
                    in_flight: self.in_flight.clone(),
                    events: self.events.clone(),
                };
                ExecutionPipeline::new(
                    self.device.as_mut(),
                    self.shutdown.clone(),
                    self.connect_timeout,
                )
                .run_observed(&session, &mut relay)
                .await
            }
            Err(e) => {
                warn!("[{}] Queued record is invalid, not running it: {}", id, e);
                rejected(&e.to_string(), e.kind())
            }
        };

        let state = self.commit(session, &report, started_at).await?;
        Ok(PollOutcome::Completed { id, state })
    }

    /// Writes the execution log, moves the session to its terminal bucket and
    /// appends the history record.
    async fn commit(
        &mut self,
        mut session: Session,
        report: &PipelineReport,
        started_at: DateTime<Utc>,
    ) -> Result<LifecycleState, SchedulerError> {
        session.execution_log.extend(report.steps.iter().cloned());
        session.failure = report.failure().cloned();
        if let Err(e) = self.store.update(&session, LifecycleState::Running) {
            error!("[{}] Could not write execution log: {}", session.id, e);
        }
        self.finish(PendingCommit {
            session,
            final_state: report.final_state(),
            started_at,
            frames_captured: report.frames_captured,
            mode_used: report.mode_used,
        })
        .await
    }

    /// Moves a finished run out of Running. When the move fails the commit is
    /// kept and retried by the next poll.
    async fn finish(&mut self, pending: PendingCommit) -> Result<LifecycleState, SchedulerError> {
        let id = pending.session.id;
        let final_state = pending.final_state;

        let mut attempt = 1;
        loop {
            match self
                .store
                .move_session(id, LifecycleState::Running, final_state)
            {
                Ok(()) => break,
                Err(StoreError::ClaimBusy { .. }) if attempt < COMMIT_ATTEMPTS => {
                    debug!("[{}] Commit blocked by another mover, retrying", id);
                    attempt += 1;
                    tokio::time::sleep(COMMIT_RETRY_DELAY).await;
                }
                Err(e) => {
                    error!("[{}] Commit to {} failed, will retry: {}", id, final_state, e);
                    self.pending = Some(pending);
                    return Err(e.into());
                }
            }
        }
        *lock(&self.in_flight) = None;

        let record = HistoryRecord::from_session(
            &pending.session,
            final_state,
            pending.started_at,
            pending.frames_captured,
            pending.mode_used,
        );
        self.store.append_history(&record)?;
        info!("[{}] Finished as {}", id, final_state);
        let _ = self.events.send(SchedulerEvent::Committed {
            id,
            state: final_state,
        });
        Ok(final_state)
    }

    /// Runs until the shutdown token fires.
    pub async fn run(mut self) {
        if self.config.recover_orphans {
            match self.recover_orphans() {
                Ok(0) => {}
                Ok(count) => warn!("Recovered {} orphaned session(s)", count),
                Err(e) => error!("Orphan recovery failed: {}", e),
            }
        }

        let interval = self.config.poll_interval();
        info!("Scheduler started, polling every {:?}", interval);
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.poll_once().await {
                Ok(PollOutcome::Completed { id, state }) => {
                    debug!("[{}] Poll completed session as {}", id, state)
                }
                Ok(outcome) => trace!("Poll outcome: {:?}", outcome),
                Err(e) => error!("Scheduler poll failed: {}", e),
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        if let Err(e) = self.device.disconnect().await {
            warn!("Final device disconnect failed: {}", e);
        }
        info!("Scheduler stopped");
    }

    /// Moves the loop onto its own task.
    pub fn spawn(self) -> SchedulerHandle {
        let shutdown = self.shutdown.clone();
        let in_flight = self.in_flight.clone();
        let events = self.events.clone();
        let store = self.store.clone();
        let deadline = self.config.shutdown_deadline();
        let task = tokio::spawn(self.run());
        SchedulerHandle::new(shutdown, in_flight, events, store, deadline, task)
    }
}
