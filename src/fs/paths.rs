//! Local file layout.
//!
//! Each downloaded leaf resolves to one file:
//! `<download_directory>/<course folder>/<block key>.<ext>`.

use std::path::{Path, PathBuf};

use crate::course::Block;
use crate::error::{Error, Result};
use crate::fs::naming::{leaf_filename, sanitize_path_component};

/// Folder holding a course's downloaded files.
pub fn course_folder(base_dir: &Path, course_id: &str) -> Result<PathBuf> {
    Ok(base_dir.join(sanitize_path_component(course_id)?))
}

/// Local path a leaf block downloads to.
pub fn leaf_path(base_dir: &Path, course_id: &str, block: &Block) -> Result<PathBuf> {
    let url = block
        .download_url
        .as_deref()
        .ok_or_else(|| Error::transfer(&block.id, "block has no download url"))?;

    let folder = course_folder(base_dir, course_id)?;
    Ok(folder.join(leaf_filename(&block.id, url, block.file_type())?))
}

/// Remove a file if it exists.
pub async fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}
