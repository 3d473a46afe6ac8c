//! Common test utilities.
//!
//! Provides in-memory collaborators for the engine and a small fixture course.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;

use offline_sync::analytics::{AnalyticsEvent, DownloadsAnalytics};
use offline_sync::config::{Config, ConnectionKind};
use offline_sync::course::{Block, BlockType, CourseStructure, CourseStructureSource};
use offline_sync::download::{PoolEvent, Transfer, TransferRequest};
use offline_sync::error::{Error, Result};
use offline_sync::store::MemoryStore;
use offline_sync::sync::{OfflineSync, SyncServices};
use offline_sync::system::{FixedStorage, StaticNetwork};

pub const COURSE: &str = "course-v1:edX+DemoX+2024";
pub const BIG_COURSE: &str = "course-v1:edX+BigX+2024";
pub const ODD_COURSE: &str = "course-v1:edX+OddX+2024";
pub const MIB: u64 = 1024 * 1024;

/// Writes a few small chunks per block, checking for cancellation between them.
///
/// URLs containing `fail` error after the first chunk. Blocks listed in the
/// hold set stay in flight until released or cancelled.
#[derive(Default)]
pub struct ScriptedTransfer {
    held: Mutex<HashSet<String>>,
    attempts: Mutex<Vec<String>>,
}

impl ScriptedTransfer {
    pub fn hold(&self, block_id: &str) {
        self.held.lock().unwrap().insert(block_id.to_string());
    }

    pub fn release(&self, block_id: &str) {
        self.held.lock().unwrap().remove(block_id);
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    fn is_held(&self, block_id: &str) -> bool {
        self.held.lock().unwrap().contains(block_id)
    }
}

#[async_trait]
impl Transfer for ScriptedTransfer {
    async fn fetch(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64> {
        self.attempts.lock().unwrap().push(request.block_id.clone());

        if let Some(parent) = request.dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut written = 0u64;
        let mut content = Vec::new();
        for chunk in 0..4u8 {
            if cancel.is_cancelled() {
                return Err(Error::CancelledByUser);
            }
            content.extend(std::iter::repeat(chunk).take(256));
            tokio::fs::write(&request.dest, &content).await?;
            written += 256;
            progress(written);

            if request.source_url.contains("fail") {
                return Err(Error::transfer(&request.block_id, "connection reset"));
            }

            while self.is_held(&request.block_id) {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::CancelledByUser),
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                }
            }
        }

        Ok(written)
    }
}

/// Structure source serving fixed structures, with an optional gate on fetch.
#[derive(Default)]
pub struct MapSource {
    structures: Mutex<HashMap<String, CourseStructure>>,
    fetch_gate: Mutex<Option<Arc<Notify>>>,
}

impl MapSource {
    pub fn with(structures: Vec<CourseStructure>) -> Self {
        let source = Self::default();
        for structure in structures {
            source
                .structures
                .lock()
                .unwrap()
                .insert(structure.id.clone(), structure);
        }
        source
    }

    /// Make the next fetches wait until the returned gate is notified.
    pub fn gate_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.fetch_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Stop serving a course, both fresh and cached.
    pub fn remove(&self, course_id: &str) {
        self.structures.lock().unwrap().remove(course_id);
    }

    fn lookup(&self, course_id: &str) -> Result<CourseStructure> {
        self.structures
            .lock()
            .unwrap()
            .get(course_id)
            .cloned()
            .ok_or_else(|| Error::StructureUnavailable(course_id.to_string()))
    }
}

#[async_trait]
impl CourseStructureSource for MapSource {
    async fn cached(&self, course_id: &str) -> Result<CourseStructure> {
        self.lookup(course_id)
    }

    async fn fetch(&self, course_id: &str) -> Result<CourseStructure> {
        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.lookup(course_id)
    }
}

/// Analytics sink remembering every event.
#[derive(Default)]
pub struct RecordingAnalytics {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl RecordingAnalytics {
    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: AnalyticsEvent) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }
}

impl DownloadsAnalytics for RecordingAnalytics {
    fn log_event(&self, event: AnalyticsEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Demo course:
///
/// ```text
/// chapter
/// ├── seq-1 ── vert-1 ── video-a (10 MiB), html-b (5 MiB)
/// └── seq-2 ── vert-2 ── video-c (20 MiB, fails), video-d (1 MiB)
/// ```
pub fn demo_course() -> CourseStructure {
    CourseStructure {
        id: COURSE.to_string(),
        name: "Demo Course".to_string(),
        version: 1,
        blocks: vec![
            Block::container("chapter", BlockType::Chapter, "Week 1", &["seq-1", "seq-2"]),
            Block::container("seq-1", BlockType::Sequential, "Intro", &["vert-1"]),
            Block::container("vert-1", BlockType::Vertical, "Unit 1", &["video-a", "html-b"]),
            Block::leaf("video-a", BlockType::Video, "Welcome", 10 * MIB, "mem://video-a.mp4"),
            Block::leaf("html-b", BlockType::XBlock, "Notes", 5 * MIB, "mem://html-b.zip"),
            Block::container("seq-2", BlockType::Sequential, "Deep dive", &["vert-2"]),
            Block::container("vert-2", BlockType::Vertical, "Unit 2", &["video-c", "video-d"]),
            Block::leaf("video-c", BlockType::Video, "Lecture", 20 * MIB, "mem://fail/video-c.mp4"),
            Block::leaf("video-d", BlockType::Video, "Recap", MIB, "mem://video-d.mp4"),
        ],
    }
}

/// A course holding one 110 MiB video.
pub fn big_course() -> CourseStructure {
    CourseStructure {
        id: BIG_COURSE.to_string(),
        name: "Big Course".to_string(),
        version: 1,
        blocks: vec![
            Block::container("big-seq", BlockType::Sequential, "Everything", &["big-video"]),
            Block::leaf("big-video", BlockType::Video, "Marathon", 110 * MIB, "mem://big.mp4"),
        ],
    }
}

/// A course where one leaf id cannot be used as a filename.
pub fn odd_course() -> CourseStructure {
    CourseStructure {
        id: ODD_COURSE.to_string(),
        name: "Odd Course".to_string(),
        version: 1,
        blocks: vec![
            Block::container("odd-seq", BlockType::Sequential, "Mixed", &["good", "odd..id"]),
            Block::leaf("good", BlockType::Video, "Good", MIB, "mem://good.mp4"),
            Block::leaf("odd..id", BlockType::Video, "Odd", MIB, "mem://odd.mp4"),
        ],
    }
}

/// An engine wired to in-memory collaborators.
pub struct Harness {
    pub engine: Arc<OfflineSync>,
    pub store: Arc<MemoryStore>,
    pub source: Arc<MapSource>,
    pub transfer: Arc<ScriptedTransfer>,
    pub network: Arc<StaticNetwork>,
    pub storage: Arc<FixedStorage>,
    pub analytics: Arc<RecordingAnalytics>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.storage.download_directory = Some(dir.path().join("downloads"));
        config.preferences.wifi_only = false;
        adjust(&mut config);

        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(MapSource::with(vec![demo_course(), big_course(), odd_course()]));
        let transfer = Arc::new(ScriptedTransfer::default());
        let network = Arc::new(StaticNetwork::new(ConnectionKind::Wifi));
        let storage = Arc::new(FixedStorage::new(10 * 1024 * MIB));
        let analytics = Arc::new(RecordingAnalytics::default());

        let engine = Arc::new(OfflineSync::new(
            &config,
            SyncServices {
                store: store.clone(),
                source: source.clone(),
                transfer: transfer.clone(),
                network: network.clone(),
                storage: storage.clone(),
                analytics: analytics.clone(),
            },
        ));

        Self {
            engine,
            store,
            source,
            transfer,
            network,
            storage,
            analytics,
            dir,
        }
    }

    pub fn download_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("downloads")
    }
}

pub fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// Collect terminal events for `block_ids`, ignoring everything else.
pub async fn wait_terminal(
    events: &mut broadcast::Receiver<PoolEvent>,
    block_ids: &[&str],
) -> HashMap<String, PoolEvent> {
    let mut finished = HashMap::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while finished.len() < block_ids.len() {
            let event = events.recv().await.unwrap();
            if event.is_terminal() && block_ids.contains(&event.block_id()) {
                finished.insert(event.block_id().to_string(), event);
            }
        }
    })
    .await
    .expect("downloads did not finish in time");
    finished
}

/// Wait for a Started event of `block_id`.
pub async fn wait_started(events: &mut broadcast::Receiver<PoolEvent>, block_id: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let PoolEvent::Started { block_id: id, .. } = events.recv().await.unwrap() {
                if id == block_id {
                    return;
                }
            }
        }
    })
    .await
    .expect("download did not start in time");
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Every file below `dir`, recursively.
pub fn files_under(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(files_under(&path));
        } else {
            files.push(path);
        }
    }
    files
}
