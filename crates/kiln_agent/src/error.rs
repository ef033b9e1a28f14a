//! Error types for the agent crate.

use thiserror::Error;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur while orchestrating a generation session.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM not configured. Set OPENAI_API_KEY or ANTHROPIC_API_KEY")]
    LlmNotConfigured,

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Inference timed out after {0} seconds")]
    InferenceTimeout(u64),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Tool {0} was already called this turn")]
    DuplicateToolCall(String),

    #[error("Nothing left to plan: {0}")]
    NothingToPlan(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] kiln_core::CoreError),

    #[error(transparent)]
    Sandbox(#[from] kiln_sandbox::SandboxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AgentError {
    /// Bad tool name or arguments. Reported to the model, never fatal.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnknownTool(_) | Self::InvalidArguments { .. } | Self::DuplicateToolCall(_)
        )
    }

    /// Failure at the inference boundary.
    pub fn is_inference(&self) -> bool {
        matches!(
            self,
            Self::Inference(_) | Self::InferenceTimeout(_) | Self::LlmNotConfigured
        )
    }

    /// Rejected state transition.
    pub fn is_state_error(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_state_error())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        Self::Inference(format!("Network error: {}", e))
    }
}

impl From<toml::de::Error> for AgentError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}
