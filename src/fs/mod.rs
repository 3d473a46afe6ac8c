//! Filesystem module.
//!
//! Provides:
//! - Local file layout for downloaded leaves
//! - Filename generation and sanitizing

pub mod naming;
pub mod paths;

pub use naming::{block_key, leaf_filename, sanitize_filename, sanitize_path_component};
pub use paths::{course_folder, leaf_path, remove_file_if_exists};
