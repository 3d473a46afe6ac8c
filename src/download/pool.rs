//! Download worker pool.
//!
//! A fixed number of workers pull jobs from one FIFO queue, so blocks are
//! attempted in the order they were enqueued. Every enqueue of a block starts a
//! new revision generation; a worker only ever writes revisions of its own
//! generation, so writes from a cancelled or superseded job are rejected by the
//! store instead of clobbering newer state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::course::{Block, FileType};
use crate::download::transfer::{Transfer, TransferRequest};
use crate::error::{Error, Result};
use crate::fs::{leaf_path, remove_file_if_exists};
use crate::store::{DownloadRecord, DownloadStore, DownloadedState, Revision, WriteOutcome};

const EVENT_CAPACITY: usize = 256;

/// A leaf ready to be enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub block_id: String,
    pub title: String,
    pub size_bytes: u64,
    pub source_url: String,
    pub file_type: FileType,
    pub local_path: PathBuf,
}

impl DownloadTarget {
    /// Target for a downloadable leaf, placed under `base_dir`.
    pub fn for_block(block: &Block, course_id: &str, base_dir: &Path) -> Result<Self> {
        let source_url = block
            .download_url
            .clone()
            .ok_or_else(|| Error::transfer(&block.id, "block has no download url"))?;

        Ok(Self {
            block_id: block.id.clone(),
            title: block.display_name.clone(),
            size_bytes: block.downloadable_size(),
            local_path: leaf_path(base_dir, course_id, block)?,
            source_url,
            file_type: block.file_type(),
        })
    }

    /// Target that repeats an existing record's download.
    pub fn from_record(record: &DownloadRecord) -> Self {
        Self {
            block_id: record.id.clone(),
            title: record.title.clone(),
            size_bytes: record.size_bytes,
            source_url: record.source_url.clone(),
            file_type: record.file_type,
            local_path: record.local_path.clone(),
        }
    }

    fn into_record(self, course_id: &str, revision: Revision) -> DownloadRecord {
        DownloadRecord {
            id: self.block_id,
            title: self.title,
            course_id: course_id.to_string(),
            size_bytes: self.size_bytes,
            local_path: self.local_path,
            source_url: self.source_url,
            file_type: self.file_type,
            state: DownloadedState::Waiting,
            last_modified: None,
            revision,
        }
    }
}

/// Receipt for one enqueue call.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: Uuid,
    pub course_id: String,
    /// Block ids queued, in attempt order.
    pub accepted: Vec<String>,
    /// Block ids already downloaded or already in flight.
    pub skipped: Vec<String>,
}

impl TaskHandle {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

/// Per-block worker events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    Started {
        course_id: String,
        block_id: String,
    },
    Progress {
        block_id: String,
        downloaded: u64,
        total: u64,
    },
    Completed {
        course_id: String,
        block_id: String,
        bytes: u64,
    },
    /// The record reverted to NOT_DOWNLOADED. Retry by enqueuing again.
    Failed {
        course_id: String,
        block_id: String,
        error: String,
    },
    Cancelled {
        course_id: String,
        block_id: String,
    },
}

impl PoolEvent {
    pub fn block_id(&self) -> &str {
        match self {
            PoolEvent::Started { block_id, .. }
            | PoolEvent::Progress { block_id, .. }
            | PoolEvent::Completed { block_id, .. }
            | PoolEvent::Failed { block_id, .. }
            | PoolEvent::Cancelled { block_id, .. } => block_id,
        }
    }

    /// Whether this is the last event a job emits.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PoolEvent::Completed { .. } | PoolEvent::Failed { .. } | PoolEvent::Cancelled { .. }
        )
    }
}

struct Job {
    record: DownloadRecord,
    cancel: CancellationToken,
}

struct ActiveJob {
    course_id: String,
    generation: u64,
    cancel: CancellationToken,
}

struct PoolShared {
    store: Arc<dyn DownloadStore>,
    transfer: Arc<dyn Transfer>,
    active: Mutex<HashMap<String, ActiveJob>>,
    generation: AtomicU64,
    events: broadcast::Sender<PoolEvent>,
}

/// Bounded pool of download workers.
pub struct DownloadWorkerPool {
    shared: Arc<PoolShared>,
    jobs: mpsc::UnboundedSender<Job>,
    /// Serializes enqueue and cancel so record checks and writes are not interleaved.
    admission: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DownloadWorkerPool {
    /// Start `parallelism` workers. Must be called from within a Tokio runtime.
    pub fn new(
        store: Arc<dyn DownloadStore>,
        transfer: Arc<dyn Transfer>,
        parallelism: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(PoolShared {
            store,
            transfer,
            active: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            events,
        });

        let (jobs, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shutdown = CancellationToken::new();

        let workers = (0..parallelism.max(1))
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    shared.clone(),
                    rx.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        Self {
            shared,
            jobs,
            admission: tokio::sync::Mutex::new(()),
            shutdown,
            workers: Mutex::new(workers),
        }
    }

    /// Subscribe to worker events.
    pub fn events(&self) -> broadcast::Receiver<PoolEvent> {
        self.shared.events.subscribe()
    }

    /// Number of blocks queued or transferring.
    pub fn active_count(&self) -> usize {
        self.shared.lock_active().len()
    }

    pub fn is_active(&self, block_id: &str) -> bool {
        self.shared.lock_active().contains_key(block_id)
    }

    /// Queue targets for download.
    ///
    /// Targets with a DOWNLOADED record or an in-flight job are skipped. The rest
    /// get a WAITING record and are attempted in the order given. Returns once
    /// the records are written; transfers run on the workers.
    pub async fn enqueue(&self, course_id: &str, targets: Vec<DownloadTarget>) -> Result<TaskHandle> {
        let _admission = self.admission.lock().await;

        let mut handle = TaskHandle {
            id: Uuid::new_v4(),
            course_id: course_id.to_string(),
            accepted: Vec::new(),
            skipped: Vec::new(),
        };
        let mut records = Vec::new();
        let mut seen = HashSet::new();

        for target in targets {
            if !seen.insert(target.block_id.clone()) {
                continue;
            }

            let existing = self.shared.store.get(&target.block_id).await?;
            let downloaded = existing.as_ref().is_some_and(|r| r.state.is_downloaded());
            if downloaded || self.is_active(&target.block_id) {
                tracing::debug!("Skipping {}: already downloaded or in flight", target.block_id);
                handle.skipped.push(target.block_id);
                continue;
            }

            let floor = existing.map(|r| r.revision.generation).unwrap_or(0);
            let generation = self.shared.next_generation(floor);
            handle.accepted.push(target.block_id.clone());
            records.push(target.into_record(course_id, Revision::new(generation, 0)));
        }

        if records.is_empty() {
            return Ok(handle);
        }

        self.shared.store.insert_or_replace(records.clone()).await?;

        for record in records {
            let cancel = CancellationToken::new();
            self.shared.lock_active().insert(
                record.id.clone(),
                ActiveJob {
                    course_id: record.course_id.clone(),
                    generation: record.revision.generation,
                    cancel: cancel.clone(),
                },
            );
            self.jobs
                .send(Job { record, cancel })
                .map_err(|_| Error::PoolClosed)?;
        }

        tracing::info!(
            "Queued {} download(s) for {} ({} skipped)",
            handle.accepted.len(),
            course_id,
            handle.skipped.len()
        );

        Ok(handle)
    }

    /// Cancel one block.
    ///
    /// Stops its worker at the next chunk boundary and deletes its WAITING or
    /// DOWNLOADING record. DOWNLOADED records are left alone. Returns whether
    /// anything was cancelled.
    pub async fn cancel_block(&self, block_id: &str) -> Result<bool> {
        let _admission = self.admission.lock().await;

        let active = self.shared.lock_active().remove(block_id);
        if let Some(job) = &active {
            job.cancel.cancel();
        }

        let in_flight = self
            .shared
            .store
            .get(block_id)
            .await?
            .is_some_and(|r| r.state.is_waiting_or_downloading());

        if in_flight {
            self.shared.store.delete_by_ids(&[block_id.to_string()]).await?;
        }

        let cancelled = in_flight || active.is_some();
        if cancelled {
            tracing::info!("Cancelled download of {}", block_id);
        }
        Ok(cancelled)
    }

    /// Cancel every queued or transferring block of a course.
    ///
    /// DOWNLOADED blocks are untouched. Returns the cancelled block ids.
    pub async fn cancel_course(&self, course_id: &str) -> Result<Vec<String>> {
        let _admission = self.admission.lock().await;

        let mut cancelled: Vec<String> = {
            let mut active = self.shared.lock_active();
            let ids: Vec<String> = active
                .iter()
                .filter(|(_, job)| job.course_id == course_id)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                if let Some(job) = active.remove(id) {
                    job.cancel.cancel();
                }
            }
            ids
        };

        let in_flight: Vec<String> = self
            .shared
            .store
            .get_by_course_ids(&[course_id.to_string()])
            .await?
            .into_iter()
            .filter(|r| r.state.is_waiting_or_downloading())
            .map(|r| r.id)
            .collect();

        if !in_flight.is_empty() {
            self.shared.store.delete_by_ids(&in_flight).await?;
        }

        for id in in_flight {
            if !cancelled.contains(&id) {
                cancelled.push(id);
            }
        }

        tracing::info!("Cancelled {} download(s) for {}", cancelled.len(), course_id);
        Ok(cancelled)
    }

    /// Re-queue records left WAITING or DOWNLOADING by an earlier process.
    ///
    /// Returns the number of blocks queued again.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut by_course: BTreeMap<String, Vec<DownloadTarget>> = BTreeMap::new();

        for record in self.shared.store.get_all().await? {
            if record.state.is_waiting_or_downloading() && !self.is_active(&record.id) {
                by_course
                    .entry(record.course_id.clone())
                    .or_default()
                    .push(DownloadTarget::from_record(&record));
            }
        }

        let mut recovered = 0;
        for (course_id, targets) in by_course {
            recovered += self.enqueue(&course_id, targets).await?.accepted.len();
        }

        if recovered > 0 {
            tracing::info!("Recovered {} interrupted download(s)", recovered);
        }
        Ok(recovered)
    }

    /// Stop the workers.
    ///
    /// In-flight transfers are stopped and their partial files removed; their
    /// records stay WAITING or DOWNLOADING for [`Self::recover_interrupted`].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for (_, job) in self.shared.lock_active().drain() {
            job.cancel.cancel();
        }

        let workers: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!("Download worker ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for DownloadWorkerPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl PoolShared {
    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveJob>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A generation above both `floor` and every generation handed out before.
    fn next_generation(&self, floor: u64) -> u64 {
        self.generation.fetch_max(floor, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drop the active entry for `block_id` if it still belongs to `generation`.
    fn release(&self, block_id: &str, generation: u64) {
        let mut active = self.lock_active();
        if active.get(block_id).is_some_and(|job| job.generation == generation) {
            active.remove(block_id);
        }
    }

    fn emit(&self, event: PoolEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn run(&self, job: Job) {
        let Job { record, cancel } = job;
        let generation = record.revision.generation;
        let course_id = record.course_id.clone();
        let block_id = record.id.clone();

        if cancel.is_cancelled() {
            self.release(&block_id, generation);
            self.emit(PoolEvent::Cancelled { course_id, block_id });
            return;
        }

        let downloading = record.advanced(DownloadedState::Downloading);
        match self.store.update(downloading.clone()).await {
            Ok(WriteOutcome::Applied) => {}
            Ok(outcome) => {
                tracing::debug!("Dropping job for {} at {}: {:?}", block_id, generation, outcome);
                self.release(&block_id, generation);
                self.emit(PoolEvent::Cancelled { course_id, block_id });
                return;
            }
            Err(e) => {
                tracing::warn!("Could not start {}: {}", block_id, e);
                self.release(&block_id, generation);
                self.emit(PoolEvent::Failed {
                    course_id,
                    block_id,
                    error: e.to_string(),
                });
                return;
            }
        }

        self.emit(PoolEvent::Started {
            course_id: course_id.clone(),
            block_id: block_id.clone(),
        });

        let part = part_path(&record.local_path, generation);
        let request = TransferRequest {
            block_id: block_id.clone(),
            source_url: record.source_url.clone(),
            dest: part.clone(),
        };

        let events = self.events.clone();
        let total = record.size_bytes;
        let progress_id = block_id.clone();
        let progress = move |downloaded: u64| {
            let _ = events.send(PoolEvent::Progress {
                block_id: progress_id.clone(),
                downloaded,
                total,
            });
        };

        let result = match self.transfer.fetch(&request, &cancel, &progress).await {
            Ok(bytes) => self.commit(&part, &downloading, bytes).await,
            Err(e) => Err(e),
        };

        let event = match result {
            Ok(bytes) => {
                tracing::info!("Downloaded {} ({} bytes)", block_id, bytes);
                PoolEvent::Completed {
                    course_id,
                    block_id: block_id.clone(),
                    bytes,
                }
            }
            Err(Error::CancelledByUser) => {
                discard(&part).await;
                tracing::info!("Stopped download of {}", block_id);
                PoolEvent::Cancelled {
                    course_id,
                    block_id: block_id.clone(),
                }
            }
            Err(e) => {
                discard(&part).await;
                let error = match e {
                    Error::TransferFailed { .. } => e,
                    other => Error::transfer(&block_id, other),
                };
                tracing::warn!("{}", error);

                let reverted = downloading.advanced(DownloadedState::NotDownloaded);
                match self.store.update(reverted).await {
                    Ok(WriteOutcome::Applied) => {}
                    Ok(outcome) => {
                        tracing::debug!("Failure of {} not recorded: {:?}", block_id, outcome)
                    }
                    Err(e) => tracing::warn!("Could not revert {}: {}", block_id, e),
                }

                PoolEvent::Failed {
                    course_id,
                    block_id: block_id.clone(),
                    error: error.to_string(),
                }
            }
        };

        self.release(&block_id, generation);
        self.emit(event);
    }

    /// Move a finished partial file into place and mark the record DOWNLOADED.
    async fn commit(&self, part: &Path, downloading: &DownloadRecord, bytes: u64) -> Result<u64> {
        tokio::fs::rename(part, &downloading.local_path).await?;

        let mut done = downloading.advanced(DownloadedState::Downloaded);
        done.last_modified = Some(Utc::now());

        match self.store.update(done).await? {
            WriteOutcome::Applied => Ok(bytes),
            WriteOutcome::Missing => {
                // Cancelled or removed while the last chunk was written.
                discard(&downloading.local_path).await;
                Err(Error::CancelledByUser)
            }
            WriteOutcome::Stale => Err(Error::CancelledByUser),
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<PoolShared>,
    jobs: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
    shutdown: CancellationToken,
) {
    tracing::debug!("Download worker {} started", worker_id);

    loop {
        let job = {
            let mut rx = jobs.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => None,
                job = rx.recv() => job,
            }
        };

        let Some(job) = job else { break };
        shared.run(job).await;
    }

    tracing::debug!("Download worker {} stopped", worker_id);
}

/// Partial file for one generation of a leaf's download.
fn part_path(path: &Path, generation: u64) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.part", generation));
    path.with_file_name(name)
}

async fn discard(path: &Path) {
    if let Err(e) = remove_file_if_exists(path).await {
        tracing::warn!("Could not remove {}: {}", path.display(), e);
    }
}
