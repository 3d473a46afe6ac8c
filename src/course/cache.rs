//! Shared content graph indexes keyed by course and structure version.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::course::block::CourseStructure;
use crate::course::index::ContentGraphIndex;

/// Cache of built indexes, one per `(course_id, version)`.
///
/// Entries are replaced when a newer structure version arrives and dropped
/// through [`StructureCache::invalidate`] when a course's downloads are removed.
#[derive(Debug, Default)]
pub struct StructureCache {
    entries: RwLock<HashMap<String, CachedIndex>>,
}

#[derive(Debug, Clone)]
struct CachedIndex {
    version: u64,
    structure: Arc<CourseStructure>,
    index: Arc<ContentGraphIndex>,
}

impl StructureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for `structure`, building it unless the same version is cached.
    pub fn index_for(&self, structure: &CourseStructure) -> Arc<ContentGraphIndex> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = entries.get(&structure.id) {
                if cached.version == structure.version {
                    return Arc::clone(&cached.index);
                }
            }
        }

        let index = Arc::new(ContentGraphIndex::from_structure(structure));
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            structure.id.clone(),
            CachedIndex {
                version: structure.version,
                structure: Arc::new(structure.clone()),
                index: Arc::clone(&index),
            },
        );
        tracing::debug!(
            "Indexed course {} (version {}, {} blocks)",
            structure.id,
            structure.version,
            index.len()
        );
        index
    }

    /// Cached index for a course, whatever its version.
    pub fn get(&self, course_id: &str) -> Option<Arc<ContentGraphIndex>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(course_id).map(|c| Arc::clone(&c.index))
    }

    /// Cached structure for a course, whatever its version.
    pub fn structure(&self, course_id: &str) -> Option<Arc<CourseStructure>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(course_id).map(|c| Arc::clone(&c.structure))
    }

    /// Version currently cached for a course.
    pub fn version(&self, course_id: &str) -> Option<u64> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(course_id).map(|c| c.version)
    }

    /// Drop the cached index for a course.
    pub fn invalidate(&self, course_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.remove(course_id).is_some() {
            tracing::debug!("Invalidated structure cache for {}", course_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::block::{Block, BlockType};

    fn structure(version: u64, size: u64) -> CourseStructure {
        CourseStructure {
            id: "course-1".to_string(),
            name: "Course".to_string(),
            version,
            blocks: vec![
                Block::container("seq", BlockType::Sequential, "Seq", &["vid"]),
                Block::leaf("vid", BlockType::Video, "Video", size, "https://cdn/vid.mp4"),
            ],
        }
    }

    #[test]
    fn test_same_version_reuses_index() {
        let cache = StructureCache::new();
        let first = cache.index_for(&structure(1, 10));
        let second = cache.index_for(&structure(1, 10));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_new_version_rebuilds() {
        let cache = StructureCache::new();
        cache.index_for(&structure(1, 10));
        let updated = cache.index_for(&structure(2, 20));
        assert_eq!(updated.total_size(), 20);
        assert_eq!(cache.version("course-1"), Some(2));
    }

    #[test]
    fn test_invalidate() {
        let cache = StructureCache::new();
        cache.index_for(&structure(1, 10));
        cache.invalidate("course-1");
        assert!(cache.get("course-1").is_none());
        assert!(cache.structure("course-1").is_none());
    }
}
