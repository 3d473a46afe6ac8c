//! Error types for the offline sync engine.

use thiserror::Error;

/// Main error type for the engine.
#[derive(Error, Debug)]
pub enum Error {
    // Pre-flight policy errors
    #[error("No network connection")]
    NoConnection,

    #[error("Not enough free storage: {required} bytes required, {available} bytes available")]
    InsufficientStorage { required: u64, available: u64 },

    #[error("Downloads are restricted to Wi-Fi")]
    WifiRequired,

    // Per-block transfer errors
    #[error("Transfer failed for block {block_id}: {cause}")]
    TransferFailed { block_id: String, cause: String },

    #[error("Download cancelled by user")]
    CancelledByUser,

    // Course structure errors
    #[error("Course structure unavailable for {0}")]
    StructureUnavailable(String),

    #[error("Download worker pool has shut down")]
    PoolClosed,

    // Request bookkeeping
    #[error("Unknown or already handled request: {0}")]
    UnknownRequest(String),

    // Store errors
    #[error("Download store error: {0}")]
    Store(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // File system errors
    #[error("Invalid filename (path traversal attempt): {0}")]
    InvalidFilename(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // URL parsing errors
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// Build a transfer failure for one block.
    pub fn transfer(block_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Error::TransferFailed {
            block_id: block_id.into(),
            cause: cause.to_string(),
        }
    }

    /// Whether this error is a pre-flight policy block rather than a runtime failure.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Error::NoConnection | Error::InsufficientStorage { .. } | Error::WifiRequired
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Process exit codes for the CLI.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const ABORT: i32 = 1;
    pub const BLOCKED: i32 = 2;
    pub const CONFIG_ERROR: i32 = 3;
    pub const DOWNLOAD_ERROR: i32 = 4;
    pub const UNEXPECTED_ERROR: i32 = 5;
}
