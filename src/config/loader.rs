//! Configuration structures and loading logic.

use crate::config::modes::ConnectionKind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub preferences: PreferencesConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub workers: WorkerConfig,
}

/// Where downloaded files and the record store live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for downloaded files.
    #[serde(default)]
    pub download_directory: Option<PathBuf>,

    /// Path of the record store snapshot.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

/// Learner preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferencesConfig {
    /// Only download over Wi-Fi.
    #[serde(default = "default_true")]
    pub wifi_only: bool,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self { wifi_only: true }
    }
}

/// Static network status used by the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub connection: ConnectionKind,
}

/// Download policy thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Requests at or above this many bytes need confirmation.
    #[serde(default = "default_max_cellular_size")]
    pub max_cellular_size: u64,

    /// Free storage must be at least this multiple of the requested size.
    #[serde(default = "default_download_size_factor")]
    pub download_size_factor: u64,

    /// Share of a course's total size that must be downloaded before the course counts as downloaded.
    #[serde(default = "default_size_match_threshold")]
    pub size_match_threshold: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_cellular_size: default_max_cellular_size(),
            download_size_factor: default_download_size_factor(),
            size_match_threshold: default_size_match_threshold(),
        }
    }
}

/// Worker pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent downloads.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Copy buffer size for non-HTTP transfers.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Time allowed to establish an HTTP connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Longest gap between two body reads before a transfer is abandoned.
    /// A slow but steady stream never hits it.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            chunk_size: default_chunk_size(),
            connect_timeout_seconds: default_connect_timeout(),
            read_timeout_seconds: default_read_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_cellular_size() -> u64 {
    100 * 1024 * 1024
}

fn default_download_size_factor() -> u64 {
    2
}

fn default_size_match_threshold() -> f64 {
    0.95
}

fn default_parallelism() -> usize {
    3
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Config(format!("Configuration file not found: {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;

        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the effective download directory.
    pub fn download_directory(&self) -> PathBuf {
        if let Some(dir) = &self.storage.download_directory {
            return dir.clone();
        }

        directories::ProjectDirs::from("org", "openedx", "offline-sync")
            .map(|dirs| dirs.data_dir().join("downloads"))
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Get the effective record store path.
    pub fn store_path(&self) -> PathBuf {
        self.storage
            .store_path
            .clone()
            .unwrap_or_else(|| self.download_directory().join("downloads.json"))
    }
}
