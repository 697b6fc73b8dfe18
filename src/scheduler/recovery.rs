use chrono::{DateTime, Utc};
use log::{info, warn};
use uuid::Uuid;

use crate::error_handling::types::{ErrorKind, StoreError};
use crate::execution::PipelineState;
use crate::session_management::{
    FailureInfo, HistoryRecord, LifecycleState, StepOutcome, StepRecord,
};
use crate::storage::SessionStore;

/// Moves a session out of Running into Failed with `Interrupted`, and
/// records it in history.
///
/// Used when nothing is left to commit the session normally: after a hard
/// shutdown, or for sessions a previous process left behind.
pub fn fail_interrupted(
    store: &dyn SessionStore,
    id: Uuid,
    state: PipelineState,
    started_at: Option<DateTime<Utc>>,
    message: &str,
) -> Result<(), StoreError> {
    let mut session = store.get(id, LifecycleState::Running)?;
    let now = Utc::now();
    session.execution_log.push(StepRecord {
        state,
        outcome: StepOutcome::Failed {
            kind: ErrorKind::Interrupted,
            message: message.to_string(),
        },
        started_at: now,
        finished_at: now,
    });
    session.failure = Some(FailureInfo {
        state,
        kind: ErrorKind::Interrupted,
        message: message.to_string(),
    });
    if let Err(e) = store.update(&session, LifecycleState::Running) {
        warn!("[{}] Could not record interruption in session file: {}", id, e);
    }
    store.move_session(id, LifecycleState::Running, LifecycleState::Failed)?;

    let record = HistoryRecord::from_session(
        &session,
        LifecycleState::Failed,
        started_at.unwrap_or(session.start_time),
        0,
        None,
    );
    store.append_history(&record)?;
    info!("[{}] Marked Failed ({}): {}", id, ErrorKind::Interrupted, message);
    Ok(())
}

/// Fails every session found in Running. Returns how many were recovered.
pub fn recover_orphans(store: &dyn SessionStore) -> Result<usize, StoreError> {
    let orphans = store.list(LifecycleState::Running)?;
    let mut recovered = 0;
    for session in orphans {
        let state = session
            .execution_log
            .last()
            .map(|step| step.state)
            .unwrap_or(PipelineState::Connecting);
        warn!(
            "[{}] Found in Running at startup, last known state {}",
            session.id, state
        );
        match fail_interrupted(
            store,
            session.id,
            state,
            None,
            "left in Running by a previous run",
        ) {
            Ok(()) => recovered += 1,
            Err(e) => warn!("[{}] Orphan recovery failed: {}", session.id, e),
        }
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::{CaptureSettings, Coordinates, Session};
    use crate::storage::FileSessionStore;
    use tempfile::TempDir;

    fn running_session(store: &FileSessionStore) -> Session {
        let session = Session::new(
            "NGC 7000",
            Utc::now(),
            Coordinates {
                ra: 314.7,
                dec: 44.3,
            },
            CaptureSettings {
                frame_count: 30,
                exposure_secs: 20.0,
                gain: 120,
                binning: 2,
            },
        );
        store.create(&session).unwrap();
        store.schedule(session.id).unwrap();
        store
            .move_session(session.id, LifecycleState::ToDo, LifecycleState::Running)
            .unwrap();
        session
    }

    #[test]
    fn orphans_are_failed_as_interrupted() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        let session = running_session(&store);

        assert_eq!(recover_orphans(&store).unwrap(), 1);
        assert!(store.list(LifecycleState::Running).unwrap().is_empty());

        let failed = store.get(session.id, LifecycleState::Failed).unwrap();
        let failure = failed.failure.unwrap();
        assert_eq!(failure.kind, ErrorKind::Interrupted);
        assert_eq!(failure.state, PipelineState::Connecting);

        let history = store.read_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].final_state, LifecycleState::Failed);
    }

    #[test]
    fn nothing_to_recover() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        assert_eq!(recover_orphans(&store).unwrap(), 0);
        assert!(store.read_history().unwrap().is_empty());
    }
}
