//! Generation orchestrator.
//!
//! One [`Orchestrator`] drives one session. It owns the generation state,
//! binds it to a sandbox instance, and runs either the deterministic driver
//! or the directed (LLM tool-calling) loop. The directed loop always ends
//! with a finalized project: when it runs out of turns or inference fails,
//! the deterministic driver finishes the job from whatever state it left.

use std::sync::Arc;
use std::time::Duration;

use kiln_core::{
    Blueprint, DevState, EventEmitter, EventSink, GenerationEvent, GenerationGuard, GenerationMode,
    GenerationState, SandboxBinding,
};
use kiln_sandbox::{CreateInstanceRequest, SandboxService};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{AgentError, AgentResult};
use crate::generator::PhaseGenerator;
use crate::inference::{ChatMessage, InferenceClient, InferenceMetadata, InferenceRequest};
use crate::tools::{
    self, error_payload, PhaseCapability, SandboxCapability, ToolInvocation, ToolRegistry, ToolTurn,
};

const SYSTEM_PROMPT: &str = "You are the lead engineer of a code generation session. \
Build the project phase by phase using the tools. For each phase call plan_next_phase, \
then implement_current_phase, then review_and_fix_code. When every phase is done, call \
finalize_project. Use get_project_status and read_file to inspect progress. \
Call each tool at most once per turn.";

const CONTINUE_PROMPT: &str = "Continue by calling the next tool.";

/// Settings for one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub mode: GenerationMode,
    /// Analysis/fix passes per review.
    pub review_cycles: u32,
    /// Turn ceiling of the directed loop.
    pub max_iterations: u32,
    pub max_phases: usize,
    /// Commands run in the sandbox during each review pass.
    pub review_commands: Vec<String>,
    pub deploy_on_finalize: bool,
    pub turn_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: GenerationMode::Deterministic,
            review_cycles: 10,
            max_iterations: 20,
            max_phases: 12,
            review_commands: Vec::new(),
            deploy_on_finalize: false,
            turn_timeout: None,
            command_timeout: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn directed() -> Self {
        Self {
            mode: GenerationMode::Directed,
            ..Self::default()
        }
    }

    pub fn with_review_cycles(mut self, cycles: u32) -> Self {
        self.review_cycles = cycles;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_review_command(mut self, command: impl Into<String>) -> Self {
        self.review_commands.push(command.into());
        self
    }

    pub fn with_deploy(mut self, deploy: bool) -> Self {
        self.deploy_on_finalize = deploy;
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = Some(timeout);
        self
    }
}

/// External collaborators of a session.
#[derive(Clone)]
pub struct Services {
    pub sandbox: Arc<dyn SandboxService>,
    pub generator: Arc<dyn PhaseGenerator>,
    /// Required for directed mode; without it directed sessions run
    /// deterministically.
    pub inference: Option<Arc<dyn InferenceClient>>,
    pub events: Arc<dyn EventSink>,
}

/// Why a directed session was finished by the deterministic driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FallbackReason {
    IterationLimit,
    InferenceFailed(String),
    NoInference,
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IterationLimit => write!(f, "turn limit reached"),
            Self::InferenceFailed(e) => write!(f, "inference failed: {}", e),
            Self::NoInference => write!(f, "no inference client configured"),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub mode: GenerationMode,
    /// Directed turns taken (0 for deterministic runs).
    pub turns: u32,
    pub fallback: Option<FallbackReason>,
    pub final_state: DevState,
    pub files: Vec<String>,
    pub phases: usize,
}

/// Drives one generation session.
pub struct Orchestrator {
    state: GenerationState,
    config: OrchestratorConfig,
    run_id: String,
    sandbox: Arc<dyn SandboxService>,
    generator: Arc<dyn PhaseGenerator>,
    inference: Option<Arc<dyn InferenceClient>>,
    emitter: EventEmitter,
    registry: ToolRegistry,
    guard: GenerationGuard,
    conversation: Vec<ChatMessage>,
}

impl Orchestrator {
    /// Start a new session: resolve the template, create a sandbox
    /// instance and bind it to fresh state.
    pub async fn initialize(
        session_id: impl Into<String>,
        query: impl Into<String>,
        blueprint: Blueprint,
        config: OrchestratorConfig,
        services: Services,
    ) -> AgentResult<Self> {
        let session_id = session_id.into();
        blueprint.validate()?;

        let template = services
            .sandbox
            .get_template_details(&blueprint.template)
            .await?;
        debug!(
            "Template {} has {} files",
            template.name,
            template.files.len()
        );

        let info = services
            .sandbox
            .create_instance(CreateInstanceRequest::new(&blueprint.template, &blueprint.project_name))
            .await?;
        info!(
            "Session {} bound to {} instance {}",
            session_id,
            services.sandbox.backend_name(),
            info.run_id
        );

        let mut state = GenerationState::new(&session_id, query, blueprint.clone(), config.mode);
        state.bind_sandbox(SandboxBinding {
            run_id: info.run_id,
            preview_url: info.preview_url,
            template: blueprint.template,
        });
        Self::resume(state, config, services)
    }

    /// Continue a session from existing state. The state must already be
    /// bound to a sandbox instance.
    pub fn resume(state: GenerationState, config: OrchestratorConfig, services: Services) -> AgentResult<Self> {
        let run_id = state
            .sandbox()
            .map(|s| s.run_id.clone())
            .ok_or_else(|| AgentError::Generation("session has no sandbox instance".to_string()))?;

        Ok(Self {
            emitter: EventEmitter::new(state.session_id(), services.events),
            state,
            config,
            run_id,
            sandbox: services.sandbox,
            generator: services.generator,
            inference: services.inference,
            registry: ToolRegistry::new()?,
            guard: GenerationGuard::new(),
            conversation: Vec::new(),
        })
    }

    /// Share a guard with other handles to the same session.
    pub fn with_guard(mut self, guard: GenerationGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    pub fn into_state(self) -> GenerationState {
        self.state
    }

    pub fn guard(&self) -> &GenerationGuard {
        &self.guard
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Conversation of the last directed run.
    pub fn conversation(&self) -> &[ChatMessage] {
        &self.conversation
    }

    /// Run the session to completion.
    ///
    /// Fails with `GenerationInProgress` if a run already holds the guard.
    pub async fn generate_all_files(&mut self) -> AgentResult<GenerationOutcome> {
        let _token = self.guard.acquire()?;
        let mode = self.state.mode();
        info!("Generating session {} ({} mode)", self.state.session_id(), mode);

        self.emitter.emit(GenerationEvent::GenerationStarted {
            total_files: self.state.blueprint().planned_file_count(),
        });

        let (turns, fallback) = match (mode, self.inference.clone()) {
            (GenerationMode::Deterministic, _) => (0, None),
            (GenerationMode::Directed, None) => (0, Some(FallbackReason::NoInference)),
            (GenerationMode::Directed, Some(client)) => self.run_directed(client.as_ref()).await,
        };

        if let Some(reason) = &fallback {
            warn!("Directed generation degraded ({}); finishing deterministically", reason);
            self.emitter.emit(GenerationEvent::Degraded {
                reason: reason.to_string(),
            });
        }

        if let Err(e) = self.run_deterministic().await {
            error!("Generation failed: {}", e);
            self.emitter.emit(GenerationEvent::error(e.to_string()));
            return Err(e);
        }

        Ok(GenerationOutcome {
            mode,
            turns,
            fallback,
            final_state: self.state.current_state(),
            files: self.state.status().files,
            phases: self.state.completed_phase_count(),
        })
    }

    fn is_done(&self) -> bool {
        self.state.is_finalized() && self.state.current_state() == DevState::Idle
    }

    /// Fixed plan, implement, review sequence, then finalize. Picks up
    /// from any state; returns immediately on a finalized session.
    async fn run_deterministic(&mut self) -> AgentResult<()> {
        while !self.is_done() {
            let current = self.state.current_state();
            let invocation = match current {
                DevState::Idle | DevState::Reviewing => ToolInvocation::PlanNextPhase,
                DevState::Planning => ToolInvocation::ImplementCurrentPhase,
                DevState::Implementing => ToolInvocation::ReviewAndFixCode,
                DevState::Finalizing => ToolInvocation::FinalizeProject,
            };

            match self.execute(invocation).await {
                Ok(_) => {}
                Err(AgentError::NothingToPlan(reason)) if current == DevState::Reviewing => {
                    debug!("Planning finished ({}); finalizing", reason);
                    self.execute(ToolInvocation::FinalizeProject).await?;
                }
                Err(AgentError::NothingToPlan(reason)) => {
                    return Err(AgentError::Generation(format!("nothing to generate: {}", reason)));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// LLM tool-calling loop. Returns the turns taken and, if the loop
    /// did not finish the project, why.
    async fn run_directed(&mut self, client: &dyn InferenceClient) -> (u32, Option<FallbackReason>) {
        self.conversation = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(self.brief()),
        ];

        let mut turn = 0;
        while turn < self.config.max_iterations {
            turn += 1;
            let request = InferenceRequest {
                messages: self.conversation.clone(),
                tools: self.registry.schemas(),
                metadata: InferenceMetadata {
                    session_id: self.state.session_id().to_string(),
                    turn,
                    current_state: self.state.current_state().to_string(),
                },
            };

            let response = match self.infer(client, &request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Inference failed on turn {}: {}", turn, e);
                    self.emitter.emit(GenerationEvent::error(e.to_string()));
                    return (turn, Some(FallbackReason::InferenceFailed(e.to_string())));
                }
            };

            let text = response.content.unwrap_or_default();
            if !text.trim().is_empty() {
                self.emitter.emit(GenerationEvent::ConversationReply {
                    turn,
                    message: text.clone(),
                });
            }
            let calls = response.tool_calls;
            self.conversation.push(ChatMessage::assistant(text, calls.clone()));

            let mut tool_turn = ToolTurn::new();
            for call in &calls {
                let payload = match tool_turn.admit(&self.registry, call) {
                    Ok(invocation) => self.run_tool(invocation).await,
                    Err(e) => {
                        debug!("Rejected tool call {}: {}", call.name, e);
                        error_payload(&e)
                    }
                };
                self.conversation.push(ChatMessage::tool_result(&call.id, &payload));
            }

            if self.is_done() {
                info!("Directed generation finished in {} turns", turn);
                return (turn, None);
            }
            if calls.is_empty() {
                self.conversation.push(ChatMessage::user(CONTINUE_PROMPT));
            }
        }

        (turn, Some(FallbackReason::IterationLimit))
    }

    async fn infer(
        &self,
        client: &dyn InferenceClient,
        request: &InferenceRequest,
    ) -> AgentResult<crate::inference::InferenceResponse> {
        debug!("Turn {} via {}", request.metadata.turn, client.name());
        match self.config.turn_timeout {
            Some(limit) => tokio::time::timeout(limit, client.complete(request))
                .await
                .map_err(|_| AgentError::InferenceTimeout(limit.as_secs()))?,
            None => client.complete(request).await,
        }
    }

    /// Run a tool and turn any failure into an error payload.
    async fn run_tool(&mut self, invocation: ToolInvocation) -> Value {
        let tool = invocation.tool();
        match self.execute(invocation).await {
            Ok(payload) => payload,
            Err(e) => {
                if e.is_state_error() || e.is_validation() {
                    debug!("Tool {} rejected: {}", tool, e);
                } else {
                    warn!("Tool {} failed: {}", tool, e);
                }
                error_payload(&e)
            }
        }
    }

    async fn execute(&mut self, invocation: ToolInvocation) -> AgentResult<Value> {
        let mut phase = PhaseCapability {
            state: &mut self.state,
            generator: self.generator.as_ref(),
            events: &self.emitter,
            review_cycles: self.config.review_cycles,
            max_phases: self.config.max_phases,
        };
        let sandbox = SandboxCapability {
            service: self.sandbox.as_ref(),
            run_id: &self.run_id,
            review_commands: &self.config.review_commands,
            command_timeout: self.config.command_timeout,
            deploy_on_finalize: self.config.deploy_on_finalize,
        };
        tools::execute(invocation, &mut phase, &sandbox).await
    }

    /// Opening user message: the request and the blueprint.
    fn brief(&self) -> String {
        let blueprint = serde_json::to_string_pretty(self.state.blueprint()).unwrap_or_default();
        format!(
            "Build this project: {}\n\nBlueprint:\n{}",
            self.state.query(),
            blueprint
        )
    }
}
