//! Storage subsystem
//!
//! This module persists session records as one JSON file per session inside
//! lifecycle bucket directories, plus an append-only history file.
//!
//! Components:
//! - `storage_trait`: the `SessionStore` trait defining the store contract.
//! - `file_storage`: the directory-backed implementation.
//! - `naming`: session file naming and id extraction.

pub mod file_storage;
pub mod naming;
pub mod storage_trait;

pub use file_storage::FileSessionStore;
pub use storage_trait::SessionStore;
