mod common;

use std::sync::Arc;
use std::thread;

use common::session;
use nightshift::session_management::LifecycleState;
use nightshift::storage::{FileSessionStore, SessionStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const SESSIONS: usize = 8;
const WORKERS: u64 = 6;
const ROUNDS: usize = 150;

#[test]
fn concurrent_moves_never_duplicate_or_lose_sessions() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileSessionStore::new(dir.path()).unwrap());
    let mut ids = Vec::new();
    for i in 0..SESSIONS {
        let s = session(&format!("Target {}", i), -1);
        store.create(&s).unwrap();
        ids.push(s.id);
    }
    let ids = Arc::new(ids);

    let moves = [
        (LifecycleState::Available, LifecycleState::ToDo),
        (LifecycleState::ToDo, LifecycleState::Available),
        (LifecycleState::ToDo, LifecycleState::Running),
        (LifecycleState::Running, LifecycleState::Done),
        (LifecycleState::Running, LifecycleState::Failed),
    ];

    let workers: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let store = store.clone();
            let ids = ids.clone();
            thread::spawn(move || {
                // seeded per worker so a failing interleaving can be replayed
                let mut rng = StdRng::seed_from_u64(0x5EED ^ worker);
                for _ in 0..ROUNDS {
                    let id = ids[rng.gen_range(0..SESSIONS)];
                    // bias towards the queue moves so sessions keep circulating
                    let (from, to) = moves[match rng.gen_range(0..12) {
                        0..=4 => 0,
                        5..=8 => 1,
                        9 => 2,
                        10 => 3,
                        _ => 4,
                    }];
                    let _ = store.move_session(id, from, to);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let census = store.census().unwrap();
    assert_eq!(census.len(), SESSIONS);
    for id in ids.iter() {
        let buckets = &census[id];
        assert_eq!(buckets.len(), 1, "{} found in {:?}", id, buckets);
        let located = store.locate(*id).unwrap().unwrap();
        assert_eq!(located, buckets[0]);
        assert_eq!(store.get(*id, located).unwrap().id, *id);
    }
}

#[test]
fn move_and_back_restores_the_record() {
    let dir = TempDir::new().unwrap();
    let store = FileSessionStore::new(dir.path()).unwrap();
    let s = session("Sadr region", 30);
    store.create(&s).unwrap();
    store.schedule(s.id).unwrap();

    let before = store.get(s.id, LifecycleState::ToDo).unwrap();
    store
        .move_session(s.id, LifecycleState::ToDo, LifecycleState::Available)
        .unwrap();
    store
        .move_session(s.id, LifecycleState::Available, LifecycleState::ToDo)
        .unwrap();
    assert_eq!(store.get(s.id, LifecycleState::ToDo).unwrap(), before);
}

#[test]
fn losing_mover_sees_a_structural_error() {
    let dir = TempDir::new().unwrap();
    let store = FileSessionStore::new(dir.path()).unwrap();
    let s = session("Crescent", -1);
    store.create(&s).unwrap();
    store.schedule(s.id).unwrap();

    store.unschedule(s.id).unwrap();
    let err = store
        .move_session(s.id, LifecycleState::ToDo, LifecycleState::Running)
        .unwrap_err();
    assert_eq!(err.kind(), nightshift::error_handling::ErrorKind::NotFound);
    assert_eq!(store.locate(s.id).unwrap(), Some(LifecycleState::Available));
}
