//! Download module for leaf content.
//!
//! This module provides:
//! - Byte transfer for one leaf with cooperative cancellation
//! - The bounded worker pool that runs transfers and records their state

pub mod pool;
pub mod transfer;

pub use pool::{DownloadTarget, DownloadWorkerPool, PoolEvent, TaskHandle};
pub use transfer::{HttpTransfer, Transfer, TransferRequest};
