//! Configuration validation logic.

use crate::config::loader::Config;
use crate::error::{Error, Result};

/// Upper bound for concurrent downloads.
const MAX_PARALLELISM: usize = 16;

/// Smallest accepted copy buffer.
const MIN_CHUNK_SIZE: usize = 1024;

/// Validate the entire configuration.
pub fn validate_config(config: &Config) -> Result<()> {
    validate_parallelism(config.workers.parallelism)?;
    validate_chunk_size(config.workers.chunk_size)?;
    validate_size_match_threshold(config.policy.size_match_threshold)?;

    if config.policy.download_size_factor == 0 {
        return Err(Error::ConfigValidation {
            field: "download_size_factor".to_string(),
            message: "Size factor must be at least 1".to_string(),
        });
    }

    if config.policy.max_cellular_size == 0 {
        return Err(Error::ConfigValidation {
            field: "max_cellular_size".to_string(),
            message: "Confirmation threshold must be greater than 0 bytes".to_string(),
        });
    }

    if config.workers.connect_timeout_seconds == 0 {
        return Err(Error::ConfigValidation {
            field: "connect_timeout_seconds".to_string(),
            message: "Timeout must be at least 1 second".to_string(),
        });
    }

    if config.workers.read_timeout_seconds == 0 {
        return Err(Error::ConfigValidation {
            field: "read_timeout_seconds".to_string(),
            message: "Timeout must be at least 1 second".to_string(),
        });
    }

    Ok(())
}

/// Validate the worker count.
pub fn validate_parallelism(parallelism: usize) -> Result<()> {
    if parallelism == 0 || parallelism > MAX_PARALLELISM {
        return Err(Error::ConfigValidation {
            field: "parallelism".to_string(),
            message: format!(
                "Parallelism must be between 1 and {} (got {})",
                MAX_PARALLELISM, parallelism
            ),
        });
    }

    Ok(())
}

/// Validate the copy buffer size.
pub fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size < MIN_CHUNK_SIZE {
        return Err(Error::ConfigValidation {
            field: "chunk_size".to_string(),
            message: format!(
                "Chunk size must be at least {} bytes (got {})",
                MIN_CHUNK_SIZE, chunk_size
            ),
        });
    }

    Ok(())
}

/// Validate the course size-match threshold.
pub fn validate_size_match_threshold(threshold: f64) -> Result<()> {
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(Error::ConfigValidation {
            field: "size_match_threshold".to_string(),
            message: format!("Threshold must be in (0, 1] (got {})", threshold),
        });
    }

    Ok(())
}
