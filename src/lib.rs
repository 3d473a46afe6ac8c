//! offline-sync - offline content synchronization for hierarchical course content
//!
//! This library keeps downloadable course content available offline: it decides
//! whether a download may proceed, runs downloads on a bounded worker pool, and
//! maintains live per-block and per-course download states.
//!
//! # Features
//!
//! - Course structure index (downloadable leaves, subtree sizes, container grouping)
//! - Persistent download record store with revision-guarded updates
//! - Bounded download worker pool with cancellation and crash recovery
//! - Live course state rollup with a loading hysteresis
//! - Download policy gate (connectivity, storage, Wi-Fi preference, size)
//! - Request façade for download, retry, cancel and remove
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use offline_sync::{
//!     analytics::TracingAnalytics, course::JsonStructureSource, download::HttpTransfer,
//!     store::MemoryStore, system::{DiskStorage, StaticNetwork}, Config, OfflineSync,
//!     SyncServices,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(Path::new("offline-sync.toml"))?;
//!     let services = SyncServices {
//!         store: Arc::new(MemoryStore::open(&config.store_path()).await?),
//!         source: Arc::new(JsonStructureSource::new("courses.json")),
//!         transfer: Arc::new(HttpTransfer::new(&config.workers)?),
//!         network: Arc::new(StaticNetwork::new(config.network.connection)),
//!         storage: Arc::new(DiskStorage::new(config.download_directory())),
//!         analytics: Arc::new(TracingAnalytics),
//!     };
//!     let engine = OfflineSync::new(&config, services);
//!
//!     let decision = engine.request_course_download("course-v1:edX+DemoX").await?;
//!     if decision.is_pending() {
//!         engine.confirm_download(decision.handle).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod cli;
pub mod config;
pub mod course;
pub mod download;
pub mod error;
pub mod fs;
pub mod output;
pub mod store;
pub mod sync;
pub mod system;

// Re-exports for convenience
pub use config::{Config, ConnectionKind};
pub use course::{Block, BlockType, ContentGraphIndex, CourseStructure};
pub use download::{DownloadWorkerPool, PoolEvent, TaskHandle};
pub use error::{Error, Result};
pub use store::{DownloadRecord, DownloadStore, DownloadedState, MemoryStore};
pub use sync::{
    CancelTarget, Decision, OfflineSync, PolicyDecision, PolicyGate, RemovalTarget, StateAggregator,
    SyncServices,
};
