//! Error types for configdrive-net

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for configdrive-net operations
#[derive(Error, Debug)]
pub enum NetconfError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unexpected failure reading kernel state for a device
    #[error("Failed to query device '{device}': {source}")]
    Device {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render configuration: {0}")]
    Render(#[from] std::fmt::Error),

    #[error("Command execution failed: {0}")]
    Command(String),

    #[error("Unable to write '{path}': {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Unsupported distribution: {0}")]
    UnknownDialect(String),
}

impl NetconfError {
    /// Create a device error
    pub fn device(device: impl Into<String>, source: std::io::Error) -> Self {
        Self::Device {
            device: device.into(),
            source,
        }
    }

    /// Create a persistence error
    pub fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persist {
            path: path.into(),
            source,
        }
    }
}
