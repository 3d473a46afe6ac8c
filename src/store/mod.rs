//! Persistent download store.
//!
//! The store is the single source of truth for download state. The engine
//! talks to it only through [`DownloadStore`]; [`MemoryStore`] is the bundled
//! implementation, optionally persisted to a JSON snapshot file.

pub mod file;
pub mod memory;
pub mod record;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;

pub use file::SnapshotFile;
pub use memory::MemoryStore;
pub use record::{DownloadRecord, DownloadedState, Revision};

/// Live view of every record. Slow readers only ever see the latest list.
pub type RecordStream = watch::Receiver<Arc<Vec<DownloadRecord>>>;

/// Result of a conditional record update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The stored record carries an equal or newer revision.
    Stale,
    /// No record with that id exists; updates never create records.
    Missing,
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        *self == WriteOutcome::Applied
    }
}

/// Durable download record storage.
#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// Insert records, replacing any existing record with the same id.
    async fn insert_or_replace(&self, records: Vec<DownloadRecord>) -> Result<()>;

    /// Replace an existing record if `record.revision` is newer than the stored one.
    async fn update(&self, record: DownloadRecord) -> Result<WriteOutcome>;

    /// Delete records by id. Returns how many existed.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize>;

    async fn get(&self, id: &str) -> Result<Option<DownloadRecord>>;

    async fn get_all(&self) -> Result<Vec<DownloadRecord>>;

    async fn get_by_course_ids(&self, course_ids: &[String]) -> Result<Vec<DownloadRecord>>;

    /// Subscribe to the full record list; a new list is published on every mutation.
    fn stream_all(&self) -> RecordStream;
}
