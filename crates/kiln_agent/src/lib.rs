//! # kiln_agent
//!
//! Generation orchestrator for Kiln.
//!
//! A session turns a request plus a blueprint into a finished project in a
//! sandbox, one phase at a time:
//!
//! ```text
//! plan_next_phase → implement_current_phase → review_and_fix_code ─┐
//!        ▲                                                         │
//!        └──────────────── more phases ◀───────────────────────────┤
//!                                                                  ▼
//!                                                         finalize_project
//! ```
//!
//! Two drivers share the same tools:
//!
//! - **Deterministic**: runs the sequence above for every roadmap phase
//! - **Directed**: an LLM picks the next tool each turn, bounded by a turn
//!   ceiling, with the deterministic driver as fallback
//!
//! LLM access is optional. Without an API key, directed sessions run
//! deterministically.

pub mod config;
pub mod error;
pub mod generator;
pub mod inference;
pub mod llm;
pub mod orchestrator;
pub mod tools;

pub use config::{GenerationConfig, KilnConfig, LlmConfig};
pub use error::{AgentError, AgentResult};
pub use generator::{BlueprintGenerator, LlmPhaseGenerator, PhaseGenerator, ReviewFindings};
pub use inference::{
    ChatMessage, ChatRole, InferenceClient, InferenceMetadata, InferenceRequest, InferenceResponse,
    ScriptStep, ScriptedInference, ToolCall, ToolSchema,
};
pub use llm::{LlmAdapter, LlmProvider};
pub use orchestrator::{FallbackReason, GenerationOutcome, Orchestrator, OrchestratorConfig, Services};
pub use tools::{ToolInvocation, ToolName, ToolRegistry};
