//! Filename generation and sanitizing.

use std::sync::OnceLock;

use regex::Regex;

use crate::course::FileType;
use crate::error::{Error, Result};

/// Longest extension accepted from a source URL.
const MAX_EXTENSION_LENGTH: usize = 5;

/// Validate and sanitize a filename by removing or replacing invalid characters.
///
/// Returns an error if the filename contains path traversal patterns.
pub fn sanitize_filename(name: &str) -> Result<String> {
    // Reject path traversal attempts
    if name.contains("..") {
        return Err(Error::InvalidFilename(format!(
            "Path traversal detected: '{}'",
            name
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(Error::InvalidFilename(format!(
            "Path separators not allowed in filename: '{}'",
            name
        )));
    }

    if name.contains('\0') {
        return Err(Error::InvalidFilename(format!(
            "Null bytes not allowed in filename: '{}'",
            name
        )));
    }

    let sanitized = replace_reserved(name, false);

    if sanitized.trim().is_empty() {
        return Err(Error::InvalidFilename(
            "Filename cannot be empty or whitespace-only".to_string(),
        ));
    }

    Ok(sanitized)
}

/// Sanitize a path component such as a course id into a folder name.
///
/// Separators and usage-key punctuation are replaced rather than rejected.
pub fn sanitize_path_component(name: &str) -> Result<String> {
    if name.contains("..") {
        return Err(Error::InvalidFilename(format!(
            "Path traversal detected: '{}'",
            name
        )));
    }

    if name.contains('\0') {
        return Err(Error::InvalidFilename(format!(
            "Null bytes not allowed: '{}'",
            name
        )));
    }

    let sanitized = replace_reserved(name, true);

    if sanitized.trim().is_empty() {
        return Err(Error::InvalidFilename(
            "Path component cannot be empty or whitespace-only".to_string(),
        ));
    }

    Ok(sanitized)
}

fn replace_reserved(name: &str, separators: bool) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' if separators => '_',
            ':' | '*' | '?' | '"' | '<' | '>' | '|' | '+' | '@' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

fn block_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"block@([A-Za-z0-9_\-]+)$").expect("block key pattern is valid")
    })
}

/// Short key of a block id.
///
/// Usage keys like `block-v1:edX+Demo+2024+type@video+block@0a1b2c` yield
/// `0a1b2c`; any other id is returned unchanged.
pub fn block_key(block_id: &str) -> &str {
    block_key_pattern()
        .captures(block_id)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(block_id)
}

/// File extension of a source URL's last path segment, if it looks like one.
pub fn url_extension(source_url: &str) -> Option<String> {
    let parsed = url::Url::parse(source_url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;

    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LENGTH
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }

    Some(ext.to_ascii_lowercase())
}

/// Local filename for a downloadable leaf.
pub fn leaf_filename(block_id: &str, source_url: &str, file_type: FileType) -> Result<String> {
    let ext = url_extension(source_url)
        .unwrap_or_else(|| file_type.default_extension().to_string());
    sanitize_filename(&format!("{}.{}", block_key(block_id), ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_valid() {
        assert_eq!(sanitize_filename("normal.mp4").unwrap(), "normal.mp4");
        assert_eq!(sanitize_filename("file:name.mp4").unwrap(), "file_name.mp4");
        assert_eq!(
            sanitize_filename("file*with?special.zip").unwrap(),
            "file_with_special.zip"
        );
    }

    #[test]
    fn test_sanitize_filename_path_traversal() {
        assert!(sanitize_filename("../etc/passwd").is_err());
        assert!(sanitize_filename("..\\windows\\system32").is_err());
        assert!(sanitize_filename("path/to/file.txt").is_err());
        assert!(sanitize_filename("file\0name.txt").is_err());
        assert!(sanitize_filename("   ").is_err());
    }

    #[test]
    fn test_sanitize_course_id() {
        assert_eq!(
            sanitize_path_component("course-v1:edX+DemoX+2024").unwrap(),
            "course-v1_edX_DemoX_2024"
        );
        assert!(sanitize_path_component("../evil").is_err());
    }

    #[test]
    fn test_block_key() {
        assert_eq!(
            block_key("block-v1:edX+DemoX+2024+type@video+block@5c90cffe"),
            "5c90cffe"
        );
        assert_eq!(block_key("plain-id"), "plain-id");
    }

    #[test]
    fn test_leaf_filename() {
        assert_eq!(
            leaf_filename("block-v1:a+b+type@video+block@v1", "https://cdn/x/lecture.MP4?sig=1", FileType::Video)
                .unwrap(),
            "v1.mp4"
        );
        assert_eq!(
            leaf_filename("html1", "https://cdn/offline/html1", FileType::XBlock).unwrap(),
            "html1.zip"
        );
    }
}
