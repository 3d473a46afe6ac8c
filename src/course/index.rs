//! Content graph index.
//!
//! Turns a flat block list into downloadable leaf sets and subtree sizes.
//! The index is a pure function of its block list: build one per query, or
//! share one through [`StructureCache`](crate::course::StructureCache).
//!
//! Traversal tolerates malformed input. Dangling child ids are skipped, and a
//! block already visited during a walk is never visited again, so a block
//! reachable through two containers is counted once and a cycle cannot loop.

use std::collections::{HashMap, HashSet};

use crate::course::block::{Block, BlockType, CourseStructure};

/// Lookup of a course's blocks by id.
#[derive(Debug, Clone, Default)]
pub struct ContentGraphIndex {
    blocks: HashMap<String, Block>,
    /// Block ids in the order the structure listed them.
    order: Vec<String>,
}

impl ContentGraphIndex {
    /// Build an index from a block list. Later duplicates of an id replace earlier ones.
    pub fn new(blocks: &[Block]) -> Self {
        let mut map = HashMap::with_capacity(blocks.len());
        let mut order = Vec::with_capacity(blocks.len());

        for block in blocks {
            if map.insert(block.id.clone(), block.clone()).is_none() {
                order.push(block.id.clone());
            }
        }

        Self { blocks: map, order }
    }

    /// Build an index from a course structure.
    pub fn from_structure(structure: &CourseStructure) -> Self {
        Self::new(&structure.blocks)
    }

    pub fn get(&self, id: &str) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks of a given type, in structure order.
    pub fn blocks_of_type(&self, block_type: BlockType) -> Vec<&Block> {
        self.order
            .iter()
            .filter_map(|id| self.blocks.get(id))
            .filter(|b| b.block_type == block_type)
            .collect()
    }

    /// Roots of the course walk: every chapter, or when a structure has no
    /// chapters, every block no other block lists as a descendant.
    pub fn root_ids(&self) -> Vec<String> {
        let chapters: Vec<String> = self
            .blocks_of_type(BlockType::Chapter)
            .into_iter()
            .map(|b| b.id.clone())
            .collect();
        if !chapters.is_empty() {
            return chapters;
        }

        let referenced: HashSet<&str> = self
            .blocks
            .values()
            .flat_map(|b| b.descendants.iter().map(String::as_str))
            .collect();

        self.order
            .iter()
            .filter(|id| !referenced.contains(id.as_str()))
            .cloned()
            .collect()
    }

    /// Downloadable leaves reachable from `root_ids`, depth-first, each listed once.
    pub fn downloadable_leaves<S: AsRef<str>>(&self, root_ids: &[S]) -> Vec<&Block> {
        let mut visited = HashSet::new();
        let mut leaves = Vec::new();

        for root in root_ids {
            self.walk(root.as_ref(), &mut visited, &mut leaves);
        }

        leaves
    }

    fn walk<'a>(&'a self, id: &str, visited: &mut HashSet<&'a str>, leaves: &mut Vec<&'a Block>) {
        let Some(block) = self.blocks.get(id) else {
            return;
        };
        if !visited.insert(block.id.as_str()) {
            return;
        }

        if block.is_downloadable {
            leaves.push(block);
        }

        for child in &block.descendants {
            self.walk(child, visited, leaves);
        }
    }

    /// Set of downloadable leaf ids reachable from `root_ids`.
    pub fn compute_downloadable_leaves<S: AsRef<str>>(&self, root_ids: &[S]) -> HashSet<String> {
        self.downloadable_leaves(root_ids)
            .into_iter()
            .map(|b| b.id.clone())
            .collect()
    }

    /// All downloadable leaves of the course, in course order.
    pub fn all_downloadable_leaves(&self) -> Vec<&Block> {
        self.downloadable_leaves(&self.root_ids())
    }

    /// Total byte size of the downloadable leaves under `block_id`.
    pub fn subtree_size(&self, block_id: &str) -> u64 {
        self.downloadable_leaves(&[block_id])
            .iter()
            .map(|b| b.downloadable_size())
            .sum()
    }

    /// Total byte size of every downloadable leaf in the course.
    pub fn total_size(&self) -> u64 {
        self.all_downloadable_leaves()
            .iter()
            .map(|b| b.downloadable_size())
            .sum()
    }

    /// Map of sequential id to the downloadable leaves beneath it.
    ///
    /// Sequentials without any downloadable leaf are omitted.
    pub fn group_by_container(&self) -> HashMap<String, Vec<String>> {
        self.containers()
            .into_iter()
            .map(|(seq, leaves)| (seq.id.clone(), leaves))
            .collect()
    }

    /// Sequentials in course order paired with their downloadable leaf ids.
    pub fn containers(&self) -> Vec<(&Block, Vec<String>)> {
        let mut memo: HashMap<&str, Vec<String>> = HashMap::new();
        let mut result = Vec::new();

        for sequential in self.blocks_of_type(BlockType::Sequential) {
            let mut leaves: Vec<String> = Vec::new();
            let mut seen = HashSet::new();

            for child in &sequential.descendants {
                let child_leaves = match memo.get(child.as_str()) {
                    Some(cached) => cached.clone(),
                    None => {
                        let computed: Vec<String> = self
                            .downloadable_leaves(&[child])
                            .into_iter()
                            .map(|b| b.id.clone())
                            .collect();
                        if let Some(block) = self.blocks.get(child.as_str()) {
                            memo.insert(block.id.as_str(), computed.clone());
                        }
                        computed
                    }
                };

                for leaf in child_leaves {
                    if seen.insert(leaf.clone()) {
                        leaves.push(leaf);
                    }
                }
            }

            if !leaves.is_empty() {
                result.push((sequential, leaves));
            }
        }

        result
    }

    /// Sequential that contains the given leaf, if any.
    pub fn container_of(&self, leaf_id: &str) -> Option<&Block> {
        self.containers()
            .into_iter()
            .find(|(_, leaves)| leaves.iter().any(|l| l == leaf_id))
            .map(|(seq, _)| seq)
    }

    /// Sum of sizes over a set of leaf ids. Unknown ids and duplicates add nothing.
    pub fn size_of<S: AsRef<str>>(&self, leaf_ids: &[S]) -> u64 {
        let unique: HashSet<&str> = leaf_ids.iter().map(|s| s.as_ref()).collect();
        unique
            .into_iter()
            .filter_map(|id| self.blocks.get(id))
            .map(|b| b.downloadable_size())
            .sum()
    }
}

/// Downloadable leaf ids reachable from `root_ids` in `blocks`.
pub fn compute_downloadable_leaves<S: AsRef<str>>(
    blocks: &[Block],
    root_ids: &[S],
) -> HashSet<String> {
    ContentGraphIndex::new(blocks).compute_downloadable_leaves(root_ids)
}

/// Byte size of the downloadable subtree rooted at `block_id`.
pub fn subtree_size(blocks: &[Block], block_id: &str) -> u64 {
    ContentGraphIndex::new(blocks).subtree_size(block_id)
}

/// Sequential id to downloadable leaf ids.
pub fn group_by_container(blocks: &[Block]) -> HashMap<String, Vec<String>> {
    ContentGraphIndex::new(blocks).group_by_container()
}
