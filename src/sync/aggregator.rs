//! State aggregator.
//!
//! Folds the live record stream and each tracked course's content graph into
//! one published snapshot of block states, course states and size accounting.
//! Consumers subscribe to the snapshot instead of recomputing rollups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::course::ContentGraphIndex;
use crate::store::{DownloadRecord, DownloadedState, RecordStream};

/// Number of entries in [`SizeAccount::largest`].
pub const LARGEST_DOWNLOADS: usize = 5;

/// One downloaded leaf, for the largest-downloads list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargeDownload {
    pub block_id: String,
    pub title: String,
    pub size_bytes: u64,
}

/// Byte accounting for one course.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SizeAccount {
    /// Size of every downloadable leaf.
    pub total_bytes: u64,
    /// Size of leaves with a DOWNLOADED record.
    pub downloaded_bytes: u64,
    /// Bytes still to fetch; 0 once progress reaches 1.
    pub remaining_bytes: u64,
    /// `downloaded_bytes / total_bytes`, capped at 1.
    pub progress: f64,
    /// Largest downloaded leaves, biggest first.
    pub largest: Vec<LargeDownload>,
}

impl SizeAccount {
    pub fn compute(
        course_id: &str,
        index: &ContentGraphIndex,
        records: &HashMap<&str, &DownloadRecord>,
    ) -> Self {
        let leaves = index.all_downloadable_leaves();
        let total_bytes: u64 = leaves.iter().map(|b| b.downloadable_size()).sum();

        let mut downloaded: Vec<&DownloadRecord> = leaves
            .iter()
            .filter_map(|b| course_record(course_id, records, &b.id))
            .filter(|r| r.state.is_downloaded())
            .collect();
        let downloaded_bytes: u64 = downloaded.iter().map(|r| r.size_bytes).sum();

        let progress = match total_bytes {
            0 if downloaded_bytes > 0 => 1.0,
            0 => 0.0,
            total => (downloaded_bytes as f64 / total as f64).min(1.0),
        };

        let remaining_bytes = if progress >= 1.0 {
            0
        } else {
            total_bytes.saturating_sub(downloaded_bytes)
        };

        downloaded.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then_with(|| a.id.cmp(&b.id)));
        let largest = downloaded
            .into_iter()
            .take(LARGEST_DOWNLOADS)
            .map(|r| LargeDownload {
                block_id: r.id.clone(),
                title: r.title.clone(),
                size_bytes: r.size_bytes,
            })
            .collect();

        Self {
            total_bytes,
            downloaded_bytes,
            remaining_bytes,
            progress,
            largest,
        }
    }
}

/// Published state of one tracked course.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseSnapshot {
    pub state: DownloadedState,
    pub sizes: SizeAccount,
}

/// Canonical download state shared by every consumer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncSnapshot {
    /// State of every leaf with a record. Absent leaves are NOT_DOWNLOADED.
    pub blocks: HashMap<String, DownloadedState>,
    /// Rolled-up state of every tracked course.
    pub courses: HashMap<String, CourseSnapshot>,
}

impl SyncSnapshot {
    pub fn block_state(&self, block_id: &str) -> DownloadedState {
        self.blocks.get(block_id).copied().unwrap_or_default()
    }

    pub fn course_state(&self, course_id: &str) -> DownloadedState {
        self.courses
            .get(course_id)
            .map(|c| c.state)
            .unwrap_or_default()
    }

    pub fn course(&self, course_id: &str) -> Option<&CourseSnapshot> {
        self.courses.get(course_id)
    }
}

/// Signals from the structure-fetch workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureEvent {
    /// A course download was requested and its structure is being fetched.
    Loading(String),
    /// The structure is available and its leaves have been queued.
    Loaded(String),
    /// The structure could not be fetched.
    Failed(String),
    /// The request was dismissed before anything was queued.
    Reset(String),
}

impl StructureEvent {
    pub fn course_id(&self) -> &str {
        match self {
            StructureEvent::Loading(id)
            | StructureEvent::Loaded(id)
            | StructureEvent::Failed(id)
            | StructureEvent::Reset(id) => id,
        }
    }
}

fn course_record<'a>(
    course_id: &str,
    records: &HashMap<&str, &'a DownloadRecord>,
    block_id: &str,
) -> Option<&'a DownloadRecord> {
    records
        .get(block_id)
        .copied()
        .filter(|r| r.course_id == course_id)
}

/// Course state from its leaf records.
///
/// DOWNLOADED needs every leaf DOWNLOADED and the downloaded bytes to reach
/// `size_match_threshold` of the course size. Otherwise any DOWNLOADING leaf
/// makes the course DOWNLOADING, and a course whose recorded leaves are all
/// WAITING is WAITING.
pub fn roll_up(
    course_id: &str,
    index: &ContentGraphIndex,
    records: &HashMap<&str, &DownloadRecord>,
    size_match_threshold: f64,
) -> DownloadedState {
    let leaves = index.all_downloadable_leaves();
    if leaves.is_empty() {
        return DownloadedState::NotDownloaded;
    }

    let leaf_records: Vec<Option<&DownloadRecord>> = leaves
        .iter()
        .map(|b| course_record(course_id, records, &b.id))
        .collect();

    let all_downloaded = leaf_records
        .iter()
        .all(|r| r.is_some_and(|r| r.state.is_downloaded()));
    if all_downloaded {
        let total = index.total_size();
        let downloaded: u64 = leaf_records.iter().flatten().map(|r| r.size_bytes).sum();
        if downloaded as f64 >= size_match_threshold * total as f64 {
            return DownloadedState::Downloaded;
        }
    }

    let present: Vec<DownloadedState> = leaf_records.iter().flatten().map(|r| r.state).collect();

    if present.contains(&DownloadedState::Downloading) {
        return DownloadedState::Downloading;
    }

    if !present.is_empty() && present.iter().all(|s| *s == DownloadedState::Waiting) {
        return DownloadedState::Waiting;
    }

    DownloadedState::NotDownloaded
}

/// Keep LOADING_COURSE_STRUCTURE over a computed NOT_DOWNLOADED while the
/// course's structure is still being fetched.
pub fn apply_hysteresis(
    previous: DownloadedState,
    computed: DownloadedState,
    structure_loading: bool,
) -> DownloadedState {
    if structure_loading
        && previous == DownloadedState::LoadingCourseStructure
        && computed == DownloadedState::NotDownloaded
    {
        DownloadedState::LoadingCourseStructure
    } else {
        computed
    }
}

#[derive(Debug, Default)]
struct CourseEntry {
    index: Option<Arc<ContentGraphIndex>>,
    structure_loading: bool,
    last: DownloadedState,
}

struct AggregatorInner {
    records: RecordStream,
    size_match_threshold: f64,
    courses: Mutex<HashMap<String, CourseEntry>>,
    tx: watch::Sender<Arc<SyncSnapshot>>,
}

impl AggregatorInner {
    fn lock_courses(&self) -> MutexGuard<'_, HashMap<String, CourseEntry>> {
        self.courses.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Recompute from the latest record list and publish.
    fn recompute(&self) {
        // Read the records under the lock too, so a later snapshot never
        // carries older records than the one published before it.
        let mut courses = self.lock_courses();

        let records = Arc::clone(&self.records.borrow());
        let by_id: HashMap<&str, &DownloadRecord> =
            records.iter().map(|r| (r.id.as_str(), r)).collect();
        let blocks = records.iter().map(|r| (r.id.clone(), r.state)).collect();

        let mut published = HashMap::with_capacity(courses.len());

        for (course_id, entry) in courses.iter_mut() {
            let (computed, sizes) = match &entry.index {
                Some(index) => (
                    roll_up(course_id, index, &by_id, self.size_match_threshold),
                    SizeAccount::compute(course_id, index, &by_id),
                ),
                None => (DownloadedState::NotDownloaded, SizeAccount::default()),
            };

            let state = apply_hysteresis(entry.last, computed, entry.structure_loading);
            if state != entry.last {
                tracing::debug!("Course {} is now {}", course_id, state);
            }
            entry.last = state;
            published.insert(course_id.clone(), CourseSnapshot { state, sizes });
        }

        self.tx.send_replace(Arc::new(SyncSnapshot {
            blocks,
            courses: published,
        }));
    }
}

/// Publishes [`SyncSnapshot`]s on every record change or structure event.
pub struct StateAggregator {
    inner: Arc<AggregatorInner>,
    task: JoinHandle<()>,
}

impl StateAggregator {
    /// Start following `records`. Must be called from within a Tokio runtime.
    pub fn spawn(records: RecordStream, size_match_threshold: f64) -> Self {
        let (tx, _) = watch::channel(Arc::new(SyncSnapshot::default()));
        let inner = Arc::new(AggregatorInner {
            records,
            size_match_threshold,
            courses: Mutex::new(HashMap::new()),
            tx,
        });
        inner.recompute();

        let follower = Arc::clone(&inner);
        let mut changes = inner.records.clone();
        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                follower.recompute();
            }
            tracing::debug!("Record stream closed; aggregator stopped");
        });

        Self { inner, task }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SyncSnapshot>> {
        self.inner.tx.subscribe()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<SyncSnapshot> {
        Arc::clone(&self.inner.tx.borrow())
    }

    /// Start or refresh rollups for a course with its current content graph.
    pub fn track_course(&self, course_id: &str, index: Arc<ContentGraphIndex>) {
        self.inner
            .lock_courses()
            .entry(course_id.to_string())
            .or_default()
            .index = Some(index);
        self.inner.recompute();
    }

    pub fn untrack_course(&self, course_id: &str) {
        self.inner.lock_courses().remove(course_id);
        self.inner.recompute();
    }

    /// Apply a structure-fetch signal.
    pub fn notify(&self, event: StructureEvent) {
        {
            let mut courses = self.inner.lock_courses();
            let entry = courses.entry(event.course_id().to_string()).or_default();
            match &event {
                StructureEvent::Loading(_) => {
                    entry.structure_loading = true;
                    entry.last = DownloadedState::LoadingCourseStructure;
                }
                StructureEvent::Loaded(_) | StructureEvent::Reset(_) => {
                    entry.structure_loading = false;
                }
                StructureEvent::Failed(course_id) => {
                    tracing::warn!("Structure for {} could not be loaded", course_id);
                    entry.structure_loading = false;
                }
            }
        }
        self.inner.recompute();
    }
}

impl Drop for StateAggregator {
    fn drop(&mut self) {
        self.task.abort();
    }
}
