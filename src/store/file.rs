//! JSON snapshot persistence for the record store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::record::DownloadRecord;

const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    format: u32,
    records: Vec<DownloadRecord>,
}

/// A JSON file holding every download record.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// snapshot, so a crash leaves either the old or the new snapshot on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing file is an empty store.
    pub async fn load(&self) -> Result<Vec<DownloadRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let snapshot: Snapshot = serde_json::from_str(&content)?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(Error::Store(format!(
                "Unsupported snapshot format {} in {}",
                snapshot.format,
                self.path.display()
            )));
        }

        Ok(snapshot.records)
    }

    /// Atomically replace the snapshot with `records`.
    pub async fn save(&self, records: &[DownloadRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let snapshot = Snapshot {
            format: SNAPSHOT_FORMAT,
            records: records.to_vec(),
        };
        let content = serde_json::to_vec_pretty(&snapshot)?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        Ok(())
    }
}
