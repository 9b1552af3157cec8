//! Core error types

use thiserror::Error;

/// Core error type for the identity service
#[derive(Debug, Error)]
pub enum CoreError {
    /// Settings failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings file could not be parsed
    #[cfg(feature = "toml")]
    #[error("Settings parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
