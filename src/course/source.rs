//! Course structure source port.
//!
//! The engine never fetches structure from the network itself. It asks a
//! [`CourseStructureSource`] for either the cached copy or a fresh one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::course::block::CourseStructure;
use crate::error::{Error, Result};

/// Provider of course structures.
#[async_trait]
pub trait CourseStructureSource: Send + Sync {
    /// Structure from local cache. Fails with `StructureUnavailable` when none is cached.
    async fn cached(&self, course_id: &str) -> Result<CourseStructure>;

    /// Fresh structure. Implementations fall back to the cached copy on failure.
    async fn fetch(&self, course_id: &str) -> Result<CourseStructure>;
}

/// Structure source backed by a JSON file holding one structure or a list of them.
#[derive(Debug, Clone)]
pub struct JsonStructureSource {
    path: PathBuf,
}

impl JsonStructureSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every structure in the file.
    pub async fn load_all(&self) -> Result<Vec<CourseStructure>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Config(format!(
                    "Course structure file not found: {}",
                    self.path.display()
                ))
            } else {
                Error::Io(e)
            }
        })?;
        parse_structures(&content)
    }

    async fn find(&self, course_id: &str) -> Result<CourseStructure> {
        let mut by_id: HashMap<String, CourseStructure> = self
            .load_all()
            .await?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        by_id
            .remove(course_id)
            .ok_or_else(|| Error::StructureUnavailable(course_id.to_string()))
    }
}

/// Parse a JSON document holding either one structure or an array of them.
pub fn parse_structures(content: &str) -> Result<Vec<CourseStructure>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    if value.is_array() {
        Ok(serde_json::from_value(value)?)
    } else {
        Ok(vec![serde_json::from_value(value)?])
    }
}

#[async_trait]
impl CourseStructureSource for JsonStructureSource {
    async fn cached(&self, course_id: &str) -> Result<CourseStructure> {
        self.find(course_id).await
    }

    async fn fetch(&self, course_id: &str) -> Result<CourseStructure> {
        self.find(course_id).await
    }
}
