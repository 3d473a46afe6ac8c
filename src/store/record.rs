//! Persisted download record types.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::course::FileType;

/// Download lifecycle state of one leaf, or the rolled-up state of a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadedState {
    Waiting,
    Downloading,
    Downloaded,
    #[default]
    NotDownloaded,
    /// Course-level only: the course's structure is still being fetched.
    LoadingCourseStructure,
}

impl DownloadedState {
    pub fn is_waiting_or_downloading(&self) -> bool {
        matches!(
            self,
            DownloadedState::Waiting
                | DownloadedState::Downloading
                | DownloadedState::LoadingCourseStructure
        )
    }

    pub fn is_downloaded(&self) -> bool {
        *self == DownloadedState::Downloaded
    }
}

impl fmt::Display for DownloadedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadedState::Waiting => write!(f, "waiting"),
            DownloadedState::Downloading => write!(f, "downloading"),
            DownloadedState::Downloaded => write!(f, "downloaded"),
            DownloadedState::NotDownloaded => write!(f, "not downloaded"),
            DownloadedState::LoadingCourseStructure => write!(f, "loading course structure"),
        }
    }
}

/// Ordering marker for writes to one record.
///
/// `generation` grows with every enqueue of the block; `step` grows with
/// every write made by that enqueue's job. Compared lexicographically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Revision {
    pub generation: u64,
    pub step: u32,
}

impl Revision {
    pub const fn new(generation: u64, step: u32) -> Self {
        Self { generation, step }
    }

    /// The next write within the same generation.
    pub const fn next(self) -> Self {
        Self {
            generation: self.generation,
            step: self.step + 1,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.generation, self.step)
    }
}

/// Durable record of one leaf's download lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Block id of the leaf.
    pub id: String,
    pub title: String,
    pub course_id: String,
    pub size_bytes: u64,
    pub local_path: PathBuf,
    pub source_url: String,
    pub file_type: FileType,
    pub state: DownloadedState,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revision: Revision,
}

impl DownloadRecord {
    /// Copy of this record in a new state, one revision step later.
    pub fn advanced(&self, state: DownloadedState) -> Self {
        Self {
            state,
            revision: self.revision.next(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_ordering() {
        assert!(Revision::new(1, 5) < Revision::new(2, 0));
        assert!(Revision::new(2, 0) < Revision::new(2, 1));
        assert_eq!(Revision::new(3, 1).next(), Revision::new(3, 2));
    }

    #[test]
    fn test_state_serializes_screaming_case() {
        let json = serde_json::to_string(&DownloadedState::LoadingCourseStructure).unwrap();
        assert_eq!(json, "\"LOADING_COURSE_STRUCTURE\"");
    }
}
