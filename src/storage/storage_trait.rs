//! Session Store trait
//!
//! This module defines the `SessionStore` trait, the one interface through
//! which every component reads or mutates session records.
//!
//! Implementors of this trait are responsible for:
//! - Keeping each session in exactly one bucket at any instant
//! - Moving records between buckets atomically
//! - Serialising concurrent movers of the same record
//! - Appending history records without ever rewriting them
//!
//! All methods return a `Result` so that structural problems (`NotFound`,
//! `Conflict`) always reach the caller.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error_handling::types::StoreError;
use crate::session_management::{HistoryRecord, HistoryStats, LifecycleState, Session};

pub trait SessionStore: Send + Sync {
    /// Validates `session` and writes it into Available.
    ///
    /// Fails with `Conflict` if a record with the same id exists in any bucket.
    fn create(&self, session: &Session) -> Result<(), StoreError>;

    /// Sessions currently in `bucket`, ordered by start time then id.
    ///
    /// Re-reads the bucket on every call.
    fn list(&self, bucket: LifecycleState) -> Result<Vec<Session>, StoreError>;

    fn get(&self, id: Uuid, bucket: LifecycleState) -> Result<Session, StoreError>;

    /// Bucket currently holding `id`, if any.
    fn locate(&self, id: Uuid) -> Result<Option<LifecycleState>, StoreError>;

    /// Moves a record from one bucket to another.
    ///
    /// - `NotFound` if the record is absent from `from`
    /// - `Conflict` if `to` already holds the id, or another caller is
    ///   moving the same record
    /// - `InvalidTransition` if `from -> to` is not a lifecycle transition
    ///
    /// On any failure the record is left in `from`.
    fn move_session(
        &self,
        id: Uuid,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<(), StoreError>;

    /// Rewrites a record in place. Only Available and Running records change.
    fn update(&self, session: &Session, bucket: LifecycleState) -> Result<(), StoreError>;

    /// Removes a record from Available.
    fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    fn append_history(&self, record: &HistoryRecord) -> Result<(), StoreError>;

    /// History records in the order they were appended.
    fn read_history(&self) -> Result<Vec<HistoryRecord>, StoreError>;

    /// Moves Done and Failed records whose start time is before `cutoff` out
    /// of the buckets into the archive. Returns how many were moved.
    ///
    /// Archived records no longer appear in any bucket; their history records
    /// are kept.
    fn archive_finished(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Moves records in `bucket` that no longer deserialize into Failed, so
    /// they stop sitting in front of the queue. Returns their ids.
    fn quarantine_unreadable(&self, bucket: LifecycleState) -> Result<Vec<Uuid>, StoreError>;

    /// Every id on disk with the buckets it occurs in.
    fn census(&self) -> Result<BTreeMap<Uuid, Vec<LifecycleState>>, StoreError>;

    fn schedule(&self, id: Uuid) -> Result<(), StoreError> {
        self.move_session(id, LifecycleState::Available, LifecycleState::ToDo)
    }

    /// Returns a queued session to Available. Fails with `NotFound` once the
    /// scheduler has claimed it.
    fn unschedule(&self, id: Uuid) -> Result<(), StoreError> {
        self.move_session(id, LifecycleState::ToDo, LifecycleState::Available)
    }

    fn history_stats(&self) -> Result<HistoryStats, StoreError> {
        Ok(HistoryStats::from_records(&self.read_history()?))
    }
}
