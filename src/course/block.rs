//! Course block representation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of a node in the course tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Chapter,
    Sequential,
    Vertical,
    Video,
    #[serde(alias = "xblock")]
    XBlock,
    #[serde(other)]
    Other,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockType::Chapter => write!(f, "chapter"),
            BlockType::Sequential => write!(f, "sequential"),
            BlockType::Vertical => write!(f, "vertical"),
            BlockType::Video => write!(f, "video"),
            BlockType::XBlock => write!(f, "x_block"),
            BlockType::Other => write!(f, "other"),
        }
    }
}

/// Kind of file a downloadable leaf resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    Video,
    XBlock,
}

impl FileType {
    /// Default file extension used when the source URL carries none.
    pub fn default_extension(&self) -> &'static str {
        match self {
            FileType::Video => "mp4",
            FileType::XBlock => "zip",
        }
    }
}

/// One node of a course's content tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,

    #[serde(rename = "type")]
    pub block_type: BlockType,

    #[serde(default)]
    pub display_name: String,

    /// Ordered child ids. May reference ids absent from the course.
    #[serde(default)]
    pub descendants: Vec<String>,

    #[serde(default)]
    pub is_downloadable: bool,

    /// Size in bytes, 0 unless the block is a downloadable leaf.
    #[serde(default)]
    pub file_size: u64,

    /// Where the leaf's bytes are fetched from.
    #[serde(default)]
    pub download_url: Option<String>,
}

impl Block {
    /// Create a container block.
    pub fn container(id: &str, block_type: BlockType, name: &str, descendants: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            block_type,
            display_name: name.to_string(),
            descendants: descendants.iter().map(|d| d.to_string()).collect(),
            is_downloadable: false,
            file_size: 0,
            download_url: None,
        }
    }

    /// Create a downloadable leaf block.
    pub fn leaf(id: &str, block_type: BlockType, name: &str, size: u64, url: &str) -> Self {
        Self {
            id: id.to_string(),
            block_type,
            display_name: name.to_string(),
            descendants: Vec::new(),
            is_downloadable: true,
            file_size: size,
            download_url: Some(url.to_string()),
        }
    }

    /// Size this block contributes to a subtree sum.
    pub fn downloadable_size(&self) -> u64 {
        if self.is_downloadable {
            self.file_size
        } else {
            0
        }
    }

    /// File type this leaf downloads as.
    pub fn file_type(&self) -> FileType {
        match self.block_type {
            BlockType::Video => FileType::Video,
            _ => FileType::XBlock,
        }
    }

    pub fn is_video(&self) -> bool {
        self.block_type == BlockType::Video
    }
}

/// A course's full block list as delivered by the structure workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseStructure {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Bumped by the structure workflow whenever the block list changes.
    #[serde(default)]
    pub version: u64,

    pub blocks: Vec<Block>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_deserializes_with_defaults() {
        let json = r#"{"id": "v1", "type": "video", "is_downloadable": true, "file_size": 10}"#;
        let block: Block = serde_json::from_str(json).unwrap();
        assert_eq!(block.block_type, BlockType::Video);
        assert!(block.descendants.is_empty());
        assert_eq!(block.download_url, None);
        assert_eq!(block.file_type(), FileType::Video);
    }

    #[test]
    fn test_unknown_block_type_maps_to_other() {
        let json = r#"{"id": "p1", "type": "problem"}"#;
        let block: Block = serde_json::from_str(json).unwrap();
        assert_eq!(block.block_type, BlockType::Other);
        assert_eq!(block.file_type(), FileType::XBlock);
    }

    #[test]
    fn test_non_downloadable_size_is_zero() {
        let mut block = Block::leaf("h1", BlockType::XBlock, "Html", 500, "https://x/h1.zip");
        assert_eq!(block.downloadable_size(), 500);
        block.is_downloadable = false;
        assert_eq!(block.downloadable_size(), 0);
    }
}
