use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::ModeUsed;
use crate::execution::PipelineState;
use crate::session_management::{FailureInfo, LifecycleState, Session, StepOutcome};

/// Condensed step outcome kept in the history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub state: PipelineState,
    pub success: bool,
}

/// Record appended once per terminal transition. Never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub session_id: Uuid,
    pub target_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub final_state: LifecycleState,
    pub steps: Vec<StepSummary>,
    pub failure: Option<FailureInfo>,
    pub frames_requested: u32,
    pub frames_captured: u32,
    pub exposure_secs: f64,
    pub mode_used: Option<ModeUsed>,
}

impl HistoryRecord {
    /// Builds the record from a session that has just reached a terminal state.
    pub fn from_session(
        session: &Session,
        final_state: LifecycleState,
        started_at: DateTime<Utc>,
        frames_captured: u32,
        mode_used: Option<ModeUsed>,
    ) -> Self {
        Self {
            session_id: session.id,
            target_name: session.target_name.clone(),
            started_at,
            finished_at: Utc::now(),
            final_state,
            steps: session
                .execution_log
                .iter()
                .map(|step| StepSummary {
                    state: step.state,
                    success: matches!(step.outcome, StepOutcome::Success),
                })
                .collect(),
            failure: session.failure.clone(),
            frames_requested: session.capture.frame_count,
            frames_captured,
            exposure_secs: session.capture.exposure_secs,
            mode_used,
        }
    }
}

/// Aggregate figures over the history file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total_sessions: usize,
    pub done: usize,
    pub failed: usize,
    pub frames_captured: u64,
    pub total_exposure_secs: f64,
    pub most_captured_target: Option<String>,
}

impl HistoryStats {
    pub fn from_records(records: &[HistoryRecord]) -> Self {
        let mut stats = HistoryStats {
            total_sessions: records.len(),
            ..Default::default()
        };
        let mut per_target: HashMap<&str, usize> = HashMap::new();

        for record in records {
            match record.final_state {
                LifecycleState::Done => stats.done += 1,
                LifecycleState::Failed => stats.failed += 1,
                _ => {}
            }
            stats.frames_captured += u64::from(record.frames_captured);
            stats.total_exposure_secs += f64::from(record.frames_captured) * record.exposure_secs;
            *per_target.entry(record.target_name.as_str()).or_default() += 1;
        }

        // ties resolve alphabetically so the result is stable
        stats.most_captured_target = per_target
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(target, _)| target.to_string());
        stats
    }
}
