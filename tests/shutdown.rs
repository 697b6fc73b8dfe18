mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{queued, ScriptedDevice};
use nightshift::configuration::SchedulerConfig;
use nightshift::error_handling::ErrorKind;
use nightshift::execution::PipelineState;
use nightshift::scheduler::{Scheduler, SchedulerEvent, SchedulerHandle, ShutdownOutcome};
use nightshift::session_management::LifecycleState;
use nightshift::storage::{FileSessionStore, SessionStore};
use tempfile::TempDir;

fn spawn(store: Arc<FileSessionStore>, device: ScriptedDevice, deadline_secs: u64) -> SchedulerHandle {
    Scheduler::new(
        store,
        Box::new(device),
        SchedulerConfig {
            poll_interval_secs: 1,
            shutdown_deadline_secs: deadline_secs,
            recover_orphans: true,
        },
        Duration::from_secs(5),
    )
    .spawn()
}

async fn wait_for_claim(handle: &SchedulerHandle) {
    while handle.status().is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn idle_scheduler_drains_immediately() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileSessionStore::new(dir.path()).unwrap());
    let handle = spawn(store, ScriptedDevice::default(), 30);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!handle.is_finished());
    assert_eq!(handle.shutdown().await.unwrap(), ShutdownOutcome::Drained);
}

#[tokio::test(start_paused = true)]
async fn graceful_shutdown_commits_the_running_session() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileSessionStore::new(dir.path()).unwrap());
    let s = queued(&store, "NGC 6960", -5);
    let handle = spawn(store.clone(), ScriptedDevice::slow("goto", Duration::from_secs(5)), 30);
    let mut events = handle.subscribe();

    wait_for_claim(&handle).await;
    assert_eq!(handle.shutdown().await.unwrap(), ShutdownOutcome::Drained);

    // goto finished, capture never started
    let failed = store.get(s.id, LifecycleState::Failed).unwrap();
    let failure = failed.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::Cancelled);
    assert_eq!(failure.state, PipelineState::Capturing);
    assert!(store.list(LifecycleState::Running).unwrap().is_empty());
    assert_eq!(store.read_history().unwrap().len(), 1);

    let mut committed = None;
    while let Ok(event) = events.try_recv() {
        if let SchedulerEvent::Committed { id, state } = event {
            committed = Some((id, state));
        }
    }
    assert_eq!(committed, Some((s.id, LifecycleState::Failed)));
}

#[tokio::test(start_paused = true)]
async fn deadline_interrupts_a_stuck_session() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileSessionStore::new(dir.path()).unwrap());
    let s = queued(&store, "NGC 6960", -5);
    let handle = spawn(
        store.clone(),
        ScriptedDevice::slow("goto", Duration::from_secs(3600)),
        2,
    );

    wait_for_claim(&handle).await;
    assert_eq!(
        handle.shutdown().await.unwrap(),
        ShutdownOutcome::Interrupted(Some(s.id))
    );

    let failed = store.get(s.id, LifecycleState::Failed).unwrap();
    let failure = failed.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::Interrupted);
    assert_eq!(failure.state, PipelineState::SlewToTarget);

    let history = store.read_history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].final_state, LifecycleState::Failed);
}
