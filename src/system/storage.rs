//! Free storage provider.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Read-only view of free device storage.
pub trait FreeStorage: Send + Sync {
    fn free_bytes(&self) -> u64;
}

/// Free space of the volume holding the download directory.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    path: PathBuf,
}

impl DiskStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Nearest existing ancestor of the download directory.
    fn probe_path(&self) -> PathBuf {
        let mut path = self.path.clone();
        while !path.exists() {
            if !path.pop() {
                return PathBuf::from(".");
            }
        }
        path
    }
}

impl FreeStorage for DiskStorage {
    fn free_bytes(&self) -> u64 {
        let probe = self.probe_path();
        match fs2::available_space(&probe) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Could not read free space of {}: {}", probe.display(), e);
                0
            }
        }
    }
}

/// Storage provider reporting a settable byte count.
#[derive(Debug)]
pub struct FixedStorage {
    bytes: AtomicU64,
}

impl FixedStorage {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: AtomicU64::new(bytes),
        }
    }

    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl FreeStorage for FixedStorage {
    fn free_bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}
