//! In-memory record store with optional snapshot persistence.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use crate::error::Result;
use crate::store::file::SnapshotFile;
use crate::store::record::DownloadRecord;
use crate::store::{DownloadStore, RecordStream, WriteOutcome};

/// Record store keeping every record in memory.
///
/// All mutations are serialized through one lock, persisted (when a snapshot
/// file is attached) and then published to subscribers before the lock is
/// released, so every subscriber sees mutations in commit order. A mutation
/// is applied to a copy first and only becomes visible once it is persisted.
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, DownloadRecord>>,
    snapshot: Option<SnapshotFile>,
    tx: watch::Sender<Arc<Vec<DownloadRecord>>>,
}

impl MemoryStore {
    /// Create an empty, non-persistent store.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            records: Mutex::new(BTreeMap::new()),
            snapshot: None,
            tx,
        }
    }

    /// Open a store backed by a snapshot file, loading any existing records.
    pub async fn open(path: &Path) -> Result<Self> {
        let snapshot = SnapshotFile::new(path);
        let loaded = snapshot.load().await?;
        let records: BTreeMap<String, DownloadRecord> =
            loaded.into_iter().map(|r| (r.id.clone(), r)).collect();

        tracing::debug!(
            "Opened download store {} with {} records",
            path.display(),
            records.len()
        );

        let (tx, _) = watch::channel(Arc::new(records.values().cloned().collect()));
        Ok(Self {
            records: Mutex::new(records),
            snapshot: Some(snapshot),
            tx,
        })
    }

    /// Persist `next`, then install and publish it. Called with the lock held.
    ///
    /// On a failed save `current` is left as it was.
    async fn commit(
        &self,
        current: &mut BTreeMap<String, DownloadRecord>,
        next: BTreeMap<String, DownloadRecord>,
    ) -> Result<()> {
        let list: Vec<DownloadRecord> = next.values().cloned().collect();
        if let Some(snapshot) = &self.snapshot {
            snapshot.save(&list).await?;
        }
        *current = next;
        self.tx.send_replace(Arc::new(list));
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DownloadStore for MemoryStore {
    async fn insert_or_replace(&self, records: Vec<DownloadRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut guard = self.records.lock().await;
        let mut next = guard.clone();
        for record in records {
            next.insert(record.id.clone(), record);
        }
        self.commit(&mut guard, next).await
    }

    async fn update(&self, record: DownloadRecord) -> Result<WriteOutcome> {
        let mut guard = self.records.lock().await;

        let outcome = match guard.get(&record.id) {
            None => WriteOutcome::Missing,
            Some(existing) if record.revision <= existing.revision => WriteOutcome::Stale,
            Some(_) => WriteOutcome::Applied,
        };

        if outcome.is_applied() {
            let mut next = guard.clone();
            next.insert(record.id.clone(), record);
            self.commit(&mut guard, next).await?;
        } else {
            tracing::debug!(
                "Dropped {:?} write for {} at revision {}",
                outcome,
                record.id,
                record.revision
            );
        }

        Ok(outcome)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        let mut guard = self.records.lock().await;
        let mut next = guard.clone();
        let removed = ids.iter().filter(|id| next.remove(*id).is_some()).count();
        if removed > 0 {
            self.commit(&mut guard, next).await?;
        }
        Ok(removed)
    }

    async fn get(&self, id: &str) -> Result<Option<DownloadRecord>> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<DownloadRecord>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn get_by_course_ids(&self, course_ids: &[String]) -> Result<Vec<DownloadRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .values()
            .filter(|r| course_ids.contains(&r.course_id))
            .cloned()
            .collect())
    }

    fn stream_all(&self) -> RecordStream {
        self.tx.subscribe()
    }
}
