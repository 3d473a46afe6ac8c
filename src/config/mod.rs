//! Configuration module for the offline sync engine.
//!
//! This module handles:
//! - Loading configuration from TOML files
//! - Connection kind parsing
//! - Configuration validation

pub mod loader;
pub mod modes;
pub mod validation;

pub use loader::{Config, NetworkConfig, PolicyConfig, PreferencesConfig, StorageConfig, WorkerConfig};
pub use modes::ConnectionKind;
pub use validation::validate_config;
