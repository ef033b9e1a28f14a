//! Error types for the sandbox module.

use thiserror::Error;

/// Result type alias for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Errors that can occur during sandbox operations.
///
/// Every variant is an expected failure mode of a backend. Callers receive
/// them as values and decide whether to continue, degrade or stop.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Instance not found")]
    InstanceNotFound(String),

    #[error("Invalid file path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error("Operation not supported by the {backend} backend: {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("Sandbox service error: {0}")]
    Remote(String),

    #[error("Invalid sandbox configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SandboxError {
    /// Convenience constructor for unknown or destroyed instances.
    pub fn not_found(run_id: impl Into<String>) -> Self {
        Self::InstanceNotFound(run_id.into())
    }

    /// Check whether the error means the instance does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::InstanceNotFound(_))
    }
}
