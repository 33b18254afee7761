//! Error types for HostWatch

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using HostWatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for HostWatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration source could not be read or deserialized
    #[error("Configuration error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// State file could not be written
    #[error("Failed to persist state to {path}: {source}")]
    StatePersist {
        /// State file being written
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// Run lock could not be opened or taken
    #[error("Run lock error on {path}: {source}")]
    Lock {
        /// Lock file path
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Alert delivery failed after all attempts
    #[error("Alert delivery failed after {attempts} attempt(s): {reason}")]
    Delivery {
        /// Attempts made
        attempts: u32,
        /// Last failure
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
