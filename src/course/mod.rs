//! Course content module.
//!
//! This module provides:
//! - Block and course structure types
//! - The content graph index (leaf sets, subtree sizes, container grouping)
//! - A version-keyed index cache
//! - The structure source port

pub mod block;
pub mod cache;
pub mod index;
pub mod source;

pub use block::{Block, BlockType, CourseStructure, FileType};
pub use cache::StructureCache;
pub use index::{compute_downloadable_leaves, group_by_container, subtree_size, ContentGraphIndex};
pub use source::{CourseStructureSource, JsonStructureSource};
