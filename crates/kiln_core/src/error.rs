//! Error types for the core module.

use thiserror::Error;

use crate::state::{DevAction, DevState};

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur during core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid transition: cannot {action} while {from}")]
    InvalidTransition { from: DevState, action: DevAction },

    #[error("Generation already in progress")]
    GenerationInProgress,

    #[error("Phase already completed: {0}")]
    PhaseAlreadyCompleted(String),

    #[error("No phase to work on: {0}")]
    NoActivePhase(String),

    #[error("Invalid generation state: {0}")]
    InvalidState(String),

    #[error("Invalid blueprint: {0}")]
    InvalidBlueprint(String),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] kiln_sandbox::SandboxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Check whether the error is a rejected state transition.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::PhaseAlreadyCompleted(_) | Self::NoActivePhase(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
