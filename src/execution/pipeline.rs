use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{PipelineObserver, PipelineReport, PipelineState, Verdict};
use crate::device::{CaptureSummary, Device, GotoTarget, ModeUsed};
use crate::error_handling::types::{DeviceError, ErrorKind};
use crate::session_management::{FailureInfo, Session, StepOutcome, StepRecord};

/// Share of requested frames a capture must deliver to count as a success.
const CAPTURE_SUCCESS_NUMERATOR: u64 = 4;
const CAPTURE_SUCCESS_DENOMINATOR: u64 = 5;

/// Minimum frames for a successful capture, rounded up.
pub fn required_frames(requested: u32) -> u32 {
    let requested = u64::from(requested);
    let required = (requested * CAPTURE_SUCCESS_NUMERATOR + CAPTURE_SUCCESS_DENOMINATOR - 1)
        / CAPTURE_SUCCESS_DENOMINATOR;
    u32::try_from(required).unwrap_or(u32::MAX)
}

struct StepFailure {
    kind: ErrorKind,
    message: String,
}

impl From<DeviceError> for StepFailure {
    fn from(err: DeviceError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Step bookkeeping shared by every state of one run.
struct Progress<'o> {
    session_id: Uuid,
    steps: Vec<StepRecord>,
    observer: &'o mut dyn PipelineObserver,
    cancellation: CancellationToken,
}

impl Progress<'_> {
    /// Runs one state unless cancellation was requested before it started.
    async fn step<T, F>(&mut self, state: PipelineState, work: F) -> Result<T, FailureInfo>
    where
        F: Future<Output = Result<T, StepFailure>>,
    {
        let started_at = Utc::now();
        let result = if self.cancellation.is_cancelled() {
            info!("[{}] Cancelled before {}", self.session_id, state);
            Err(StepFailure {
                kind: ErrorKind::Cancelled,
                message: format!("cancelled before {}", state),
            })
        } else {
            info!("[{}] {}", self.session_id, state);
            self.observer.state_entered(state);
            work.await
        };

        let (outcome, value) = match result {
            Ok(value) => (StepOutcome::Success, Ok(value)),
            Err(failure) => {
                warn!(
                    "[{}] {} failed ({}): {}",
                    self.session_id, state, failure.kind, failure.message
                );
                (
                    StepOutcome::Failed {
                        kind: failure.kind,
                        message: failure.message.clone(),
                    },
                    Err(FailureInfo {
                        state,
                        kind: failure.kind,
                        message: failure.message,
                    }),
                )
            }
        };
        let record = StepRecord {
            state,
            outcome,
            started_at,
            finished_at: Utc::now(),
        };
        self.observer.step_finished(&record);
        self.steps.push(record);
        value
    }
}

/// Optional outer bound on a calibration or focus step.
async fn bounded<F>(
    limit: Option<Duration>,
    operation: &'static str,
    work: F,
) -> Result<(), StepFailure>
where
    F: Future<Output = Result<(), DeviceError>>,
{
    let result = match limit {
        Some(after) => tokio::time::timeout(after, work)
            .await
            .unwrap_or(Err(DeviceError::Timeout { operation, after })),
        None => work.await,
    };
    result.map_err(StepFailure::from)
}

/// Drives the device through the fixed state sequence for one session.
///
/// The device is always disconnected on the way out, whatever happened
/// before, and guiding is stopped first if the run started it. A failing
/// state ends the run; nothing is retried at this level.
pub struct ExecutionPipeline<'a> {
    device: &'a mut dyn Device,
    cancellation: CancellationToken,
    connect_timeout: Duration,
}

impl<'a> ExecutionPipeline<'a> {
    pub fn new(
        device: &'a mut dyn Device,
        cancellation: CancellationToken,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            device,
            cancellation,
            connect_timeout,
        }
    }

    pub async fn run(&mut self, session: &Session) -> PipelineReport {
        self.run_observed(session, &mut ()).await
    }

    pub async fn run_observed(
        &mut self,
        session: &Session,
        observer: &mut dyn PipelineObserver,
    ) -> PipelineReport {
        let mut progress = Progress {
            session_id: session.id,
            steps: Vec::new(),
            observer,
            cancellation: self.cancellation.clone(),
        };
        let mut frames_captured = 0;
        let mut mode_used = None;
        let mut guiding = false;

        let outcome = self
            .drive(
                session,
                &mut progress,
                &mut frames_captured,
                &mut mode_used,
                &mut guiding,
            )
            .await;

        if guiding {
            if let Err(e) = self.device.stop_guiding().await {
                warn!("[{}] Failed to stop guiding: {}", session.id, e);
            }
        }

        progress.observer.state_entered(PipelineState::Disconnecting);
        let released = match self.device.disconnect().await {
            Ok(()) => true,
            Err(e) => {
                warn!("[{}] Disconnect failed: {}", session.id, e);
                false
            }
        };

        let verdict = match outcome {
            Ok(()) => {
                progress.observer.state_entered(PipelineState::Complete);
                info!("[{}] Pipeline complete", session.id);
                Verdict::Done
            }
            Err(failure) => {
                progress.observer.state_entered(PipelineState::Aborted);
                info!(
                    "[{}] Pipeline aborted in {}: {}",
                    session.id, failure.state, failure.kind
                );
                Verdict::Failed(failure)
            }
        };

        PipelineReport {
            verdict,
            steps: progress.steps,
            released,
            frames_captured,
            mode_used,
        }
    }

    async fn drive(
        &mut self,
        session: &Session,
        progress: &mut Progress<'_>,
        frames_captured: &mut u32,
        mode_used: &mut Option<ModeUsed>,
        guiding: &mut bool,
    ) -> Result<(), FailureInfo> {
        let device = &mut *self.device;
        let calibration = &session.calibration;
        let step_limit = calibration.step_timeout_secs.map(Duration::from_secs);
        let connect_timeout = self.connect_timeout;

        let mode = progress
            .step(PipelineState::Connecting, async {
                device.connect(connect_timeout).await.map_err(StepFailure::from)
            })
            .await?;
        *mode_used = Some(mode);

        if calibration.plate_solve {
            progress
                .step(
                    PipelineState::Calibrating,
                    bounded(step_limit, "calibrate", device.calibrate()),
                )
                .await?;
        } else {
            debug!("[{}] Calibration not requested", session.id);
        }

        let target = GotoTarget {
            ra: session.coordinates.ra,
            dec: session.coordinates.dec,
            target_name: session.target_name.clone(),
        };
        progress
            .step(PipelineState::SlewToTarget, async {
                device.goto(&target).await.map_err(StepFailure::from)
            })
            .await?;

        if calibration.settling_secs > 0 {
            let settle = Duration::from_secs(calibration.settling_secs);
            debug!("[{}] Settling for {:?}", session.id, settle);
            tokio::select! {
                _ = tokio::time::sleep(settle) => {}
                // the next step reports the cancellation
                _ = self.cancellation.cancelled() => {}
            }
        }

        if calibration.auto_focus {
            progress
                .step(
                    PipelineState::AutoFocusing,
                    bounded(
                        step_limit,
                        "autofocus",
                        device.autofocus(calibration.infinite_focus),
                    ),
                )
                .await?;
        } else {
            debug!("[{}] Autofocus not requested", session.id);
        }

        progress
            .step(PipelineState::Capturing, async {
                if calibration.auto_guide {
                    *guiding = true;
                    let started =
                        bounded(step_limit, "start guiding", device.start_guiding()).await;
                    if let Err(failure) = started {
                        warn!(
                            "[{}] Capturing unguided, guiding failed to start: {}",
                            session.id, failure.message
                        );
                    }
                }
                let summary = device.capture(&session.capture).await?;
                *frames_captured = summary.frames_captured;
                check_capture(&summary)
            })
            .await?;
        Ok(())
    }
}

fn check_capture(summary: &CaptureSummary) -> Result<(), StepFailure> {
    let required = required_frames(summary.frames_requested);
    if summary.frames_captured < required {
        return Err(StepFailure {
            kind: ErrorKind::IncompleteCapture,
            message: format!(
                "captured {} of {} frames, at least {} required",
                summary.frames_captured, summary.frames_requested, required
            ),
        });
    }
    Ok(())
}
