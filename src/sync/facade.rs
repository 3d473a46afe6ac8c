//! Request façade.
//!
//! The only entry point screens use: download, retry, cancel and remove,
//! at block or course level. Requests that need the learner's consent are
//! parked under a handle until [`OfflineSync::confirm_download`],
//! [`OfflineSync::confirm_removal`] or [`OfflineSync::dismiss`].

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::analytics::{AnalyticsEvent, DownloadsAnalytics};
use crate::config::Config;
use crate::course::{Block, ContentGraphIndex, CourseStructure, CourseStructureSource, StructureCache};
use crate::download::{DownloadTarget, DownloadWorkerPool, PoolEvent, TaskHandle, Transfer};
use crate::error::{Error, Result};
use crate::fs::{course_folder, remove_file_if_exists};
use crate::store::{DownloadRecord, DownloadStore};
use crate::sync::aggregator::{CourseSnapshot, SizeAccount, StateAggregator, StructureEvent, SyncSnapshot};
use crate::sync::policy::{DecisionRequest, DialogItem, DialogPayload, PolicyDecision, PolicyGate};
use crate::system::{FreeStorage, NetworkStatus};

/// Collaborators the engine runs against.
pub struct SyncServices {
    pub store: Arc<dyn DownloadStore>,
    pub source: Arc<dyn CourseStructureSource>,
    pub transfer: Arc<dyn Transfer>,
    pub network: Arc<dyn NetworkStatus>,
    pub storage: Arc<dyn FreeStorage>,
    pub analytics: Arc<dyn DownloadsAnalytics>,
}

/// Policy outcome of a request.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Handle for confirm or dismiss. Equals the task id when the request went ahead.
    pub handle: Uuid,
    pub course_id: String,
    pub decision: PolicyDecision,
    /// Set when the request was queued without confirmation.
    pub task: Option<TaskHandle>,
}

impl Decision {
    /// Whether confirm or dismiss is expected for this handle.
    pub fn is_pending(&self) -> bool {
        self.task.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelTarget {
    Blocks(Vec<String>),
    Course(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalTarget {
    Blocks {
        course_id: String,
        block_ids: Vec<String>,
    },
    Course(String),
}

#[derive(Debug, Clone)]
enum PendingRequest {
    Download {
        course_id: String,
        leaf_ids: Vec<String>,
        total_bytes: u64,
    },
    CourseDownload {
        course_id: String,
        total_bytes: u64,
    },
    Removal {
        course_id: String,
        block_ids: Vec<String>,
    },
}

impl PendingRequest {
    fn is_removal(&self) -> bool {
        matches!(self, PendingRequest::Removal { .. })
    }
}

/// The offline content synchronization engine.
pub struct OfflineSync {
    store: Arc<dyn DownloadStore>,
    source: Arc<dyn CourseStructureSource>,
    network: Arc<dyn NetworkStatus>,
    storage: Arc<dyn FreeStorage>,
    analytics: Arc<dyn DownloadsAnalytics>,
    cache: StructureCache,
    pool: DownloadWorkerPool,
    aggregator: StateAggregator,
    gate: PolicyGate,
    download_dir: PathBuf,
    wifi_only: AtomicBool,
    pending: Mutex<HashMap<Uuid, PendingRequest>>,
    reporter: JoinHandle<()>,
}

impl OfflineSync {
    /// Build the engine and start its workers. Must be called from within a Tokio runtime.
    pub fn new(config: &Config, services: SyncServices) -> Self {
        let pool = DownloadWorkerPool::new(
            Arc::clone(&services.store),
            services.transfer,
            config.workers.parallelism,
        );
        let aggregator = StateAggregator::spawn(
            services.store.stream_all(),
            config.policy.size_match_threshold,
        );
        let reporter = spawn_reporter(pool.events(), Arc::clone(&services.analytics));

        Self {
            store: services.store,
            source: services.source,
            network: services.network,
            storage: services.storage,
            analytics: services.analytics,
            cache: StructureCache::new(),
            pool,
            aggregator,
            gate: PolicyGate::new(config.policy.clone()),
            download_dir: config.download_directory(),
            wifi_only: AtomicBool::new(config.preferences.wifi_only),
            pending: Mutex::new(HashMap::new()),
            reporter,
        }
    }

    pub fn wifi_only(&self) -> bool {
        self.wifi_only.load(Ordering::SeqCst)
    }

    pub fn set_wifi_only(&self, wifi_only: bool) {
        self.wifi_only.store(wifi_only, Ordering::SeqCst);
    }

    /// Subscribe to block and course states.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SyncSnapshot>> {
        self.aggregator.subscribe()
    }

    pub fn snapshot(&self) -> Arc<SyncSnapshot> {
        self.aggregator.snapshot()
    }

    /// Subscribe to per-block worker events.
    pub fn events(&self) -> broadcast::Receiver<PoolEvent> {
        self.pool.events()
    }

    /// Start publishing a course's state and return it.
    pub async fn course_status(&self, course_id: &str) -> Result<CourseSnapshot> {
        self.open_course(course_id).await?;
        Ok(self
            .snapshot()
            .course(course_id)
            .cloned()
            .unwrap_or(CourseSnapshot {
                state: Default::default(),
                sizes: SizeAccount::default(),
            }))
    }

    /// The content graph index of a course, loading its structure if needed.
    pub async fn course_index(&self, course_id: &str) -> Result<Arc<ContentGraphIndex>> {
        let (_, index) = self.open_course(course_id).await?;
        Ok(index)
    }

    /// Request a download of the leaves under `block_ids`.
    ///
    /// Goes ahead at once when the policy allows it; otherwise the returned
    /// decision carries the dialog payload and a handle to confirm or dismiss.
    pub async fn request_download(
        &self,
        course_id: &str,
        block_ids: &[String],
        video_only: bool,
    ) -> Result<Decision> {
        let (_, index) = self.open_course(course_id).await?;
        let records = self.course_records(course_id).await?;

        let leaves: Vec<&Block> = index
            .downloadable_leaves(block_ids)
            .into_iter()
            .filter(|b| !video_only || b.is_video())
            .collect();
        let all_downloaded =
            !leaves.is_empty() && leaves.iter().all(|b| is_downloaded(&records, &b.id));

        let leaf_ids: Vec<String> = leaves
            .iter()
            .filter(|b| all_downloaded || !is_downloaded(&records, &b.id))
            .map(|b| b.id.clone())
            .collect();

        let items = container_items(&index, &leaf_ids);
        let request = DecisionRequest::download(items, all_downloaded);
        let decision = self.decide(&request);

        let pending = if all_downloaded {
            PendingRequest::Removal {
                course_id: course_id.to_string(),
                block_ids: leaf_ids,
            }
        } else {
            PendingRequest::Download {
                course_id: course_id.to_string(),
                leaf_ids,
                total_bytes: request.total_bytes(),
            }
        };

        self.resolve(course_id, decision, pending).await
    }

    /// Request a download of a whole course.
    ///
    /// The payload is one line: the course name and the bytes not yet
    /// downloaded. On confirm the structure is fetched fresh and every leaf
    /// not yet downloaded is queued.
    pub async fn request_course_download(&self, course_id: &str) -> Result<Decision> {
        self.analytics.log_event(AnalyticsEvent::DownloadCourseClicked);

        let (name, index) = match self.open_course(course_id).await {
            Ok(course) => course,
            Err(e) => {
                self.analytics.log_event(AnalyticsEvent::DownloadError);
                return Err(e);
            }
        };
        let records = self.course_records(course_id).await?;

        let downloaded_bytes: u64 = records
            .values()
            .filter(|r| r.state.is_downloaded())
            .map(|r| r.size_bytes)
            .sum();
        let leaves = index.all_downloadable_leaves();
        let all_downloaded =
            !leaves.is_empty() && leaves.iter().all(|b| is_downloaded(&records, &b.id));

        let (request, pending) = if all_downloaded {
            (
                DecisionRequest::download(vec![DialogItem::new(name, downloaded_bytes)], true),
                PendingRequest::Removal {
                    course_id: course_id.to_string(),
                    block_ids: records.keys().cloned().collect(),
                },
            )
        } else {
            let remaining = index.total_size().saturating_sub(downloaded_bytes);
            (
                DecisionRequest::download(vec![DialogItem::new(name, remaining)], false),
                PendingRequest::CourseDownload {
                    course_id: course_id.to_string(),
                    total_bytes: remaining,
                },
            )
        };

        let decision = self.decide(&request);
        self.resolve(course_id, decision, pending).await
    }

    /// Offer to retry blocks whose download failed.
    pub async fn request_retry(&self, course_id: &str, block_ids: &[String]) -> Result<Decision> {
        let (_, index) = self.open_course(course_id).await?;
        let records = self.course_records(course_id).await?;

        let leaf_ids: Vec<String> = index
            .downloadable_leaves(block_ids)
            .into_iter()
            .filter(|b| !is_downloaded(&records, &b.id))
            .map(|b| b.id.clone())
            .collect();

        let request = DecisionRequest::retry(container_items(&index, &leaf_ids));
        let decision = self.decide(&request);
        let pending = PendingRequest::Download {
            course_id: course_id.to_string(),
            leaf_ids,
            total_bytes: request.total_bytes(),
        };

        self.resolve(course_id, decision, pending).await
    }

    /// Go ahead with a parked download, retry or course request.
    ///
    /// Connectivity, storage and the Wi-Fi preference are checked again first;
    /// if they now block the download the request stays parked.
    pub async fn confirm_download(&self, handle: Uuid) -> Result<TaskHandle> {
        let pending = self.take_pending(handle, |p| !p.is_removal())?;

        let total = match &pending {
            PendingRequest::Download { total_bytes, .. }
            | PendingRequest::CourseDownload { total_bytes, .. } => *total_bytes,
            PendingRequest::Removal { .. } => 0,
        };
        if let Err(e) = self.gate.preflight(
            total,
            self.network.as_ref(),
            self.storage.as_ref(),
            self.wifi_only(),
        ) {
            tracing::info!("Download {} still blocked: {}", handle, e);
            self.lock_pending().insert(handle, pending);
            return Err(e);
        }

        self.analytics.log_event(AnalyticsEvent::DownloadConfirmed);
        match pending {
            PendingRequest::Download {
                course_id,
                leaf_ids,
                ..
            } => self.start_download(&course_id, &leaf_ids).await,
            PendingRequest::CourseDownload { course_id, .. } => {
                self.start_course_download(&course_id).await
            }
            PendingRequest::Removal { .. } => Err(Error::UnknownRequest(handle.to_string())),
        }
    }

    /// Drop a parked request.
    pub fn dismiss(&self, handle: Uuid) -> Result<()> {
        let pending = self.take_pending(handle, |_| true)?;
        self.analytics.log_event(AnalyticsEvent::DownloadCancelled);

        if let PendingRequest::CourseDownload { course_id, .. } = pending {
            self.aggregator.notify(StructureEvent::Reset(course_id));
        }
        Ok(())
    }

    /// Cancel queued or running downloads. DOWNLOADED blocks are untouched.
    ///
    /// Returns the cancelled block ids.
    pub async fn cancel_download(&self, target: CancelTarget) -> Result<Vec<String>> {
        self.analytics.log_event(AnalyticsEvent::CancelDownloadClicked);

        match target {
            CancelTarget::Blocks(block_ids) => {
                let mut cancelled = Vec::new();
                for id in block_ids {
                    if self.pool.cancel_block(&id).await? {
                        cancelled.push(id);
                    }
                }
                Ok(cancelled)
            }
            CancelTarget::Course(course_id) => {
                let cancelled = self.pool.cancel_course(&course_id).await?;
                self.aggregator.notify(StructureEvent::Reset(course_id));
                Ok(cancelled)
            }
        }
    }

    /// Build the removal dialog for blocks or a course.
    pub async fn request_removal(&self, target: RemovalTarget) -> Result<Decision> {
        self.analytics.log_event(AnalyticsEvent::RemoveDownloadClicked);

        let (course_id, items, block_ids) = match target {
            RemovalTarget::Course(course_id) => {
                let records = self.course_records(&course_id).await?;
                let downloaded: u64 = records
                    .values()
                    .filter(|r| r.state.is_downloaded())
                    .map(|r| r.size_bytes)
                    .sum();
                let name = self.course_name(&course_id).await;
                let block_ids = records.into_keys().collect();
                (course_id, vec![DialogItem::new(name, downloaded)], block_ids)
            }
            RemovalTarget::Blocks {
                course_id,
                block_ids,
            } => {
                let (_, index) = self.open_course(&course_id).await?;
                let records = self.course_records(&course_id).await?;
                let leaf_ids: Vec<String> = index
                    .downloadable_leaves(&block_ids)
                    .into_iter()
                    .filter(|b| records.contains_key(&b.id))
                    .map(|b| b.id.clone())
                    .collect();
                let items = container_items(&index, &leaf_ids);
                (course_id, items, leaf_ids)
            }
        };

        let handle = Uuid::new_v4();
        self.lock_pending().insert(
            handle,
            PendingRequest::Removal {
                course_id: course_id.clone(),
                block_ids,
            },
        );

        Ok(Decision {
            handle,
            course_id,
            decision: PolicyDecision::ConfirmRemoval(DialogPayload::new(items)),
            task: None,
        })
    }

    /// Delete the files and records of a parked removal. Returns how many records went.
    pub async fn confirm_removal(&self, handle: Uuid) -> Result<usize> {
        let PendingRequest::Removal {
            course_id,
            block_ids,
        } = self.take_pending(handle, PendingRequest::is_removal)?
        else {
            return Err(Error::UnknownRequest(handle.to_string()));
        };

        let removed = self.remove_blocks(&block_ids).await?;
        self.analytics.log_event(AnalyticsEvent::DownloadRemoved);
        tracing::info!("Removed {} download(s) from {}", removed, course_id);
        Ok(removed)
    }

    /// Cancel and delete everything recorded for a course.
    pub async fn remove_all(&self, course_id: &str) -> Result<usize> {
        self.pool.cancel_course(course_id).await?;

        let records = self
            .store
            .get_by_course_ids(&[course_id.to_string()])
            .await?;
        for record in &records {
            discard(&record.local_path).await;
        }

        let ids: Vec<String> = records.into_iter().map(|r| r.id).collect();
        let removed = self.store.delete_by_ids(&ids).await?;

        if let Ok(folder) = course_folder(&self.download_dir, course_id) {
            // Only succeeds once the folder is empty.
            let _ = tokio::fs::remove_dir(&folder).await;
        }

        // Nothing is left to roll up; the next request reloads the structure.
        self.aggregator.untrack_course(course_id);
        self.cache.invalidate(course_id);
        tracing::info!("Removed all {} download(s) of {}", removed, course_id);
        Ok(removed)
    }

    /// Re-queue downloads interrupted by an earlier shutdown.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        self.pool.recover_interrupted().await
    }

    /// Stop the workers, leaving in-flight records for the next recovery.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    fn decide(&self, request: &DecisionRequest) -> PolicyDecision {
        self.gate.decide(
            request,
            self.network.as_ref(),
            self.storage.as_ref(),
            self.wifi_only(),
        )
    }

    /// Start a request the policy let through, or park it under a new handle.
    async fn resolve(
        &self,
        course_id: &str,
        decision: PolicyDecision,
        pending: PendingRequest,
    ) -> Result<Decision> {
        if decision == PolicyDecision::ProceedSilently {
            self.analytics.log_event(AnalyticsEvent::DownloadConfirmed);
            let task = match pending {
                PendingRequest::Download { leaf_ids, .. } => {
                    self.start_download(course_id, &leaf_ids).await?
                }
                PendingRequest::CourseDownload { .. } => self.start_course_download(course_id).await?,
                PendingRequest::Removal { .. } => {
                    return Err(Error::UnknownRequest(format!(
                        "removal of {} cannot proceed silently",
                        course_id
                    )))
                }
            };

            return Ok(Decision {
                handle: task.id,
                course_id: course_id.to_string(),
                decision,
                task: Some(task),
            });
        }

        let handle = Uuid::new_v4();
        self.lock_pending().insert(handle, pending);

        Ok(Decision {
            handle,
            course_id: course_id.to_string(),
            decision,
            task: None,
        })
    }

    async fn start_download(&self, course_id: &str, leaf_ids: &[String]) -> Result<TaskHandle> {
        let index = match self.cache.get(course_id) {
            Some(index) => index,
            None => self.open_course(course_id).await?.1,
        };
        let targets = self.targets(course_id, &index, leaf_ids);
        self.pool.enqueue(course_id, targets).await
    }

    async fn start_course_download(&self, course_id: &str) -> Result<TaskHandle> {
        self.aggregator
            .notify(StructureEvent::Loading(course_id.to_string()));

        let structure = match self.fetch_structure(course_id).await {
            Ok(structure) => structure,
            Err(e) => {
                self.analytics.log_event(AnalyticsEvent::DownloadError);
                self.aggregator
                    .notify(StructureEvent::Failed(course_id.to_string()));
                return Err(e);
            }
        };

        let index = self.cache.index_for(&structure);
        self.aggregator.track_course(course_id, Arc::clone(&index));

        let leaf_ids: Vec<String> = index
            .all_downloadable_leaves()
            .into_iter()
            .map(|b| b.id.clone())
            .collect();

        let targets = self.targets(course_id, &index, &leaf_ids);
        let queued = self.pool.enqueue(course_id, targets).await;

        match &queued {
            Ok(_) => self
                .aggregator
                .notify(StructureEvent::Loaded(course_id.to_string())),
            Err(_) => self
                .aggregator
                .notify(StructureEvent::Failed(course_id.to_string())),
        }
        queued
    }

    /// Fresh structure, falling back to the cached copy.
    async fn fetch_structure(&self, course_id: &str) -> Result<CourseStructure> {
        match self.source.fetch(course_id).await {
            Ok(structure) => Ok(structure),
            Err(fetch_err) => {
                tracing::warn!("Fetching structure of {} failed: {}", course_id, fetch_err);
                self.source
                    .cached(course_id)
                    .await
                    .map_err(|_| Error::StructureUnavailable(course_id.to_string()))
            }
        }
    }

    /// Name and index of a course, from the cached structure when there is one.
    async fn open_course(&self, course_id: &str) -> Result<(String, Arc<ContentGraphIndex>)> {
        let structure = match self.source.cached(course_id).await {
            Ok(structure) => structure,
            Err(cached_err) => {
                tracing::debug!("No cached structure for {}: {}", course_id, cached_err);
                self.fetch_structure(course_id).await?
            }
        };

        let index = self.cache.index_for(&structure);
        self.aggregator.track_course(course_id, Arc::clone(&index));
        Ok((display_name(&structure), index))
    }

    async fn course_name(&self, course_id: &str) -> String {
        match self.cache.structure(course_id) {
            Some(structure) => display_name(&structure),
            None => match self.source.cached(course_id).await {
                Ok(structure) => display_name(&structure),
                Err(_) => course_id.to_string(),
            },
        }
    }

    async fn course_records(&self, course_id: &str) -> Result<HashMap<String, DownloadRecord>> {
        Ok(self
            .store
            .get_by_course_ids(&[course_id.to_string()])
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect())
    }

    fn targets(
        &self,
        course_id: &str,
        index: &ContentGraphIndex,
        leaf_ids: &[String],
    ) -> Vec<DownloadTarget> {
        let mut targets = Vec::with_capacity(leaf_ids.len());

        for block in leaf_ids.iter().filter_map(|id| index.get(id)) {
            if !block.is_downloadable {
                continue;
            }
            if block.download_url.is_none() {
                tracing::warn!("Skipping {}: no download url", block.id);
                continue;
            }
            match DownloadTarget::for_block(block, course_id, &self.download_dir) {
                Ok(target) => targets.push(target),
                Err(e) => tracing::warn!("Skipping {}: {}", block.id, e),
            }
        }

        targets
    }

    async fn remove_blocks(&self, block_ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        let mut finished = Vec::new();

        for id in block_ids {
            match self.store.get(id).await? {
                Some(record) if record.state.is_waiting_or_downloading() => {
                    if self.pool.cancel_block(id).await? {
                        removed += 1;
                    }
                }
                Some(record) => {
                    discard(&record.local_path).await;
                    finished.push(record.id);
                }
                None => {}
            }
        }

        if !finished.is_empty() {
            removed += self.store.delete_by_ids(&finished).await?;
        }
        Ok(removed)
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<Uuid, PendingRequest>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remove and return a parked request if `accept` allows it.
    fn take_pending(
        &self,
        handle: Uuid,
        accept: impl Fn(&PendingRequest) -> bool,
    ) -> Result<PendingRequest> {
        let mut pending = self.lock_pending();
        match pending.get(&handle) {
            Some(request) if accept(request) => pending
                .remove(&handle)
                .ok_or_else(|| Error::UnknownRequest(handle.to_string())),
            _ => Err(Error::UnknownRequest(handle.to_string())),
        }
    }
}

impl Drop for OfflineSync {
    fn drop(&mut self) {
        self.reporter.abort();
    }
}

/// Forward worker outcomes to analytics.
fn spawn_reporter(
    mut events: broadcast::Receiver<PoolEvent>,
    analytics: Arc<dyn DownloadsAnalytics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PoolEvent::Started { .. }) => {
                    analytics.log_event(AnalyticsEvent::DownloadStarted)
                }
                Ok(PoolEvent::Completed { .. }) => {
                    analytics.log_event(AnalyticsEvent::DownloadCompleted)
                }
                Ok(PoolEvent::Failed { .. }) => analytics.log_event(AnalyticsEvent::DownloadError),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Analytics reporter skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn display_name(structure: &CourseStructure) -> String {
    if structure.name.is_empty() {
        structure.id.clone()
    } else {
        structure.name.clone()
    }
}

fn is_downloaded(records: &HashMap<String, DownloadRecord>, block_id: &str) -> bool {
    records
        .get(block_id)
        .is_some_and(|r| r.state.is_downloaded())
}

/// Dialog lines for a set of leaves: one per sequential, in course order.
///
/// A leaf reachable from two sequentials is counted under the first only.
/// Leaves outside any sequential get a line of their own.
fn container_items(index: &ContentGraphIndex, leaf_ids: &[String]) -> Vec<DialogItem> {
    let wanted: HashSet<&str> = leaf_ids.iter().map(String::as_str).collect();
    let mut covered: HashSet<String> = HashSet::new();
    let mut items = Vec::new();

    for (container, leaves) in index.containers() {
        let inside: Vec<String> = leaves
            .into_iter()
            .filter(|l| wanted.contains(l.as_str()) && !covered.contains(l))
            .collect();
        let size = index.size_of(&inside);
        covered.extend(inside);

        if size > 0 {
            items.push(DialogItem::new(container.display_name.clone(), size));
        }
    }

    for id in leaf_ids {
        if covered.contains(id) {
            continue;
        }
        if let Some(block) = index.get(id) {
            if block.downloadable_size() > 0 {
                items.push(DialogItem::new(block.display_name.clone(), block.downloadable_size()));
            }
        }
    }

    items
}

async fn discard(path: &std::path::Path) {
    if let Err(e) = remove_file_if_exists(path).await {
        tracing::warn!("Could not remove {}: {}", path.display(), e);
    }
}
