//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file path does not exist
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    /// IO error reading config file
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Semantic validation failure with the offending field path
    #[error("Invalid configuration at '{field}': {message}")]
    Validation { field: String, message: String },
}
