//! Core Error Types
//!
//! Defines the orchestration error taxonomy shared across the Cascade
//! workspace. These error types are dependency-free (only thiserror + serde +
//! std) to keep the core crate lightweight.
//!
//! Every `CoreError` maps onto an [`ErrorKind`], the serializable label that
//! travels inside a failed `ProviderResponse` and inside emitted events.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Serializable classification of an orchestration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The dependency graph contains a cycle
    CyclicDependency,
    /// A provider was requested (or referenced) but never registered
    UnknownProvider,
    /// A provider did not answer within its timeout
    Timeout,
    /// A provider returned an error or a malformed response
    ProviderFailure,
    /// A cache payload exceeded the per-entry bound
    PayloadTooLarge,
    /// The budget cannot afford even the cheapest tier
    BudgetExceeded,
    /// The cache backend is unreachable
    CacheUnavailable,
    /// The caller aborted the turn
    Cancelled,
    /// Invalid configuration
    Config,
    /// Anything else
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::CyclicDependency => write!(f, "cyclic_dependency"),
            ErrorKind::UnknownProvider => write!(f, "unknown_provider"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::ProviderFailure => write!(f, "provider_failure"),
            ErrorKind::PayloadTooLarge => write!(f, "payload_too_large"),
            ErrorKind::BudgetExceeded => write!(f, "budget_exceeded"),
            ErrorKind::CacheUnavailable => write!(f, "cache_unavailable"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

impl ErrorKind {
    /// Whether the executor recovers from this kind locally (the plan goes on).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::ProviderFailure
                | ErrorKind::PayloadTooLarge
                | ErrorKind::CacheUnavailable
        )
    }

    /// Whether this kind is fatal to the current turn.
    pub fn is_fatal_to_turn(&self) -> bool {
        matches!(
            self,
            ErrorKind::CyclicDependency | ErrorKind::UnknownProvider | ErrorKind::BudgetExceeded
        )
    }
}

/// Core error type for the Cascade workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The dependency graph contains a cycle among the listed providers
    #[error("Circular dependency detected among providers: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    /// A provider name that was never registered
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// A provider call exceeded its deadline
    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    /// The provider failed or answered with something unusable
    #[error("Provider failure: {0}")]
    ProviderFailure(String),

    /// A cache payload is larger than the configured bound
    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// Not even the cheapest tier fits the remaining budget
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// The cache backend cannot be reached
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// The caller cancelled the turn
    #[error("Execution cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create an unknown provider error
    pub fn unknown_provider(name: impl Into<String>) -> Self {
        Self::UnknownProvider(name.into())
    }

    /// Create a provider failure error
    pub fn provider_failure(msg: impl Into<String>) -> Self {
        Self::ProviderFailure(msg.into())
    }

    /// Create a budget exceeded error
    pub fn budget_exceeded(msg: impl Into<String>) -> Self {
        Self::BudgetExceeded(msg.into())
    }

    /// Create a cache unavailable error
    pub fn cache_unavailable(msg: impl Into<String>) -> Self {
        Self::CacheUnavailable(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::CyclicDependency(_) => ErrorKind::CyclicDependency,
            CoreError::UnknownProvider(_) => ErrorKind::UnknownProvider,
            CoreError::Timeout { .. } => ErrorKind::Timeout,
            CoreError::ProviderFailure(_) | CoreError::Serialization(_) => {
                ErrorKind::ProviderFailure
            }
            CoreError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            CoreError::BudgetExceeded(_) => ErrorKind::BudgetExceeded,
            CoreError::CacheUnavailable(_) => ErrorKind::CacheUnavailable,
            CoreError::Cancelled => ErrorKind::Cancelled,
            CoreError::Config(_) => ErrorKind::Config,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Convert CoreError to a string
impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
