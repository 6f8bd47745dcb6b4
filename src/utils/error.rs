//! Error Handling
//!
//! Unified error types for the orchestrator crate.
//! Extends `cascade_core::CoreError` with the config-file concerns that need
//! heavier dependencies (TOML, filesystem).

use cascade_core::{CoreError, ErrorKind};
use thiserror::Error;

/// Orchestrator-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Orchestration errors from the core taxonomy
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse errors
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for orchestrator errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error in the core taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Core(err) => err.kind(),
            AppError::Config(_)
            | AppError::Io(_)
            | AppError::Toml(_)
            | AppError::TomlSerialize(_)
            | AppError::Validation(_) => ErrorKind::Config,
            AppError::Serialization(_) | AppError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Convert AppError to a string
impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}
