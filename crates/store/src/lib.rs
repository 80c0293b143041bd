//! Persisted resume-record store.
//!
//! The upload engine keeps exactly one piece of cross-process state: a
//! [`ResumeRecord`] per upload target, keyed by the target's stable record
//! key. This crate defines the narrow store contract the engine consumes
//! and two implementations:
//!
//! - [`JsonFileStore`] — records cached in memory and persisted to a JSON
//!   file, for real resumption across process restarts.
//! - [`MemoryStore`] — records held in memory only, for tests and embedders
//!   that manage persistence themselves.
//!
//! All operations are last-write-wins; no transactional guarantees are made
//! or needed.

mod file;
mod memory;

use upwell_protocol::ResumeRecord;

pub use file::{JsonFileStore, default_store_path};
pub use memory::MemoryStore;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store directory not available")]
    NoStoreDir,
}

/// Contract for the persisted session record store.
///
/// Implementations must be safe to share across tasks; the engine only ever
/// issues one call at a time per session.
pub trait SessionStore: Send + Sync {
    /// Returns the record for a target key, if any.
    fn get(&self, key: &str) -> Result<Option<ResumeRecord>, StoreError>;

    /// Saves (or overwrites) the record for a target key.
    fn set(&self, key: &str, record: &ResumeRecord) -> Result<(), StoreError>;

    /// Removes the record for a target key. Removing an absent key is not an
    /// error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}
