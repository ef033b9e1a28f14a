//! Tool registry and tool implementations.
//!
//! Six tools drive a session. Four of them mutate the generation state and
//! map one-to-one onto [`DevAction`]s; `get_project_status` and `read_file`
//! are pure queries. Each tool gets only the capabilities it needs, never the
//! orchestrator itself.
//!
//! Tools return a JSON payload. Failures are turned into
//! `{"success": false, "error": ...}` payloads by [`error_payload`] so the
//! model can read them; they never end the session.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use jsonschema::JSONSchema;
use kiln_core::{
    CoreError, DevAction, DevState, EventEmitter, GeneratedFile, GenerationEvent, GenerationState,
};
use kiln_sandbox::{normalize_path, SandboxFile, SandboxService};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{AgentError, AgentResult};
use crate::generator::{PhaseGenerator, ReviewFindings};
use crate::inference::{ToolCall, ToolSchema};

/// The tools a session exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    PlanNextPhase,
    ImplementCurrentPhase,
    ReviewAndFixCode,
    FinalizeProject,
    GetProjectStatus,
    ReadFile,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        ToolName::PlanNextPhase,
        ToolName::ImplementCurrentPhase,
        ToolName::ReviewAndFixCode,
        ToolName::FinalizeProject,
        ToolName::GetProjectStatus,
        ToolName::ReadFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanNextPhase => "plan_next_phase",
            Self::ImplementCurrentPhase => "implement_current_phase",
            Self::ReviewAndFixCode => "review_and_fix_code",
            Self::FinalizeProject => "finalize_project",
            Self::GetProjectStatus => "get_project_status",
            Self::ReadFile => "read_file",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::PlanNextPhase => {
                "Plan the next implementation phase. Allowed when idle or after a review."
            }
            Self::ImplementCurrentPhase => {
                "Generate the files of the planned phase and write them to the sandbox."
            }
            Self::ReviewAndFixCode => {
                "Run static analysis, runtime checks and review commands, apply fixes and complete the phase."
            }
            Self::FinalizeProject => {
                "Write the README, optionally deploy, and finish the project. Allowed after a review."
            }
            Self::GetProjectStatus => "List generated files, phases and the current state.",
            Self::ReadFile => "Read one generated file by path.",
        }
    }

    /// JSON schema of the tool's arguments.
    pub fn parameters(&self) -> Value {
        match self {
            Self::ReadFile => json!({
                "type": "object",
                "properties": {
                    "filePath": {
                        "type": "string",
                        "minLength": 1,
                        "description": "Path of the file relative to the project root"
                    }
                },
                "required": ["filePath"]
            }),
            _ => json!({"type": "object", "properties": {}}),
        }
    }

    /// The state machine action performed by a mutating tool.
    pub fn action(&self) -> Option<DevAction> {
        match self {
            Self::PlanNextPhase => Some(DevAction::PlanNextPhase),
            Self::ImplementCurrentPhase => Some(DevAction::ImplementCurrentPhase),
            Self::ReviewAndFixCode => Some(DevAction::ReviewAndFix),
            Self::FinalizeProject => Some(DevAction::Finalize),
            Self::GetProjectStatus | Self::ReadFile => None,
        }
    }

    pub fn is_mutating(&self) -> bool {
        self.action().is_some()
    }

    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.as_str().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolName {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AgentError::UnknownTool(s.to_string()))
    }
}

/// A validated tool call, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    PlanNextPhase,
    ImplementCurrentPhase,
    ReviewAndFixCode,
    FinalizeProject,
    GetProjectStatus,
    ReadFile { file_path: String },
}

impl ToolInvocation {
    pub fn tool(&self) -> ToolName {
        match self {
            Self::PlanNextPhase => ToolName::PlanNextPhase,
            Self::ImplementCurrentPhase => ToolName::ImplementCurrentPhase,
            Self::ReviewAndFixCode => ToolName::ReviewAndFixCode,
            Self::FinalizeProject => ToolName::FinalizeProject,
            Self::GetProjectStatus => ToolName::GetProjectStatus,
            Self::ReadFile { .. } => ToolName::ReadFile,
        }
    }
}

/// Tool schemas plus their compiled argument validators.
pub struct ToolRegistry {
    tools: Vec<(ToolName, JSONSchema)>,
}

impl ToolRegistry {
    pub fn new() -> AgentResult<Self> {
        let mut tools = Vec::with_capacity(ToolName::ALL.len());
        for tool in ToolName::ALL {
            let schema = tool.parameters();
            let compiled = JSONSchema::compile(&schema).map_err(|e| {
                AgentError::Config(format!("invalid schema for {}: {}", tool, e))
            })?;
            tools.push((tool, compiled));
        }
        Ok(Self { tools })
    }

    /// Schemas sent to the model.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|(tool, _)| tool.schema()).collect()
    }

    /// Check a tool name and its arguments.
    pub fn validate(&self, name: &str, arguments: &Value) -> AgentResult<ToolInvocation> {
        let tool: ToolName = name.parse()?;
        let compiled = self
            .tools
            .iter()
            .find(|(t, _)| *t == tool)
            .map(|(_, c)| c)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;

        let empty = json!({});
        let arguments = if arguments.is_null() { &empty } else { arguments };
        if let Err(errors) = compiled.validate(arguments) {
            let message = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            return Err(AgentError::InvalidArguments {
                tool: tool.to_string(),
                message,
            });
        }

        Ok(match tool {
            ToolName::PlanNextPhase => ToolInvocation::PlanNextPhase,
            ToolName::ImplementCurrentPhase => ToolInvocation::ImplementCurrentPhase,
            ToolName::ReviewAndFixCode => ToolInvocation::ReviewAndFixCode,
            ToolName::FinalizeProject => ToolInvocation::FinalizeProject,
            ToolName::GetProjectStatus => ToolInvocation::GetProjectStatus,
            ToolName::ReadFile => ToolInvocation::ReadFile {
                file_path: arguments["filePath"].as_str().unwrap_or_default().to_string(),
            },
        })
    }
}

/// Tracks which tools ran in the current control-loop turn.
#[derive(Debug, Default)]
pub struct ToolTurn {
    used: HashSet<ToolName>,
}

impl ToolTurn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a call and reserve its tool for this turn.
    pub fn admit(&mut self, registry: &ToolRegistry, call: &ToolCall) -> AgentResult<ToolInvocation> {
        let invocation = registry.validate(&call.name, &call.arguments)?;
        if !self.used.insert(invocation.tool()) {
            return Err(AgentError::DuplicateToolCall(call.name.clone()));
        }
        Ok(invocation)
    }
}

/// Access to the generation state and the generator.
pub struct PhaseCapability<'a> {
    pub state: &'a mut GenerationState,
    pub generator: &'a dyn PhaseGenerator,
    pub events: &'a EventEmitter,
    pub review_cycles: u32,
    pub max_phases: usize,
}

impl PhaseCapability<'_> {
    fn transition(&mut self, action: DevAction) -> AgentResult<DevState> {
        let from = self.state.current_state();
        let to = self.state.apply(action)?;
        self.events.emit(GenerationEvent::StateChanged { from, to });
        Ok(to)
    }

    /// Record files in the state. Returns the accepted files and the
    /// rejected paths with their reasons.
    fn record(&mut self, files: Vec<GeneratedFile>) -> (Vec<SandboxFile>, Vec<Value>) {
        let mut accepted = Vec::new();
        let mut skipped = Vec::new();
        for file in files {
            let path = match normalize_path(&file.path) {
                Ok(path) => path,
                Err(e) => {
                    warn!("Skipping generated file {}: {}", file.path, e);
                    skipped.push(json!({"path": file.path, "error": e.to_string()}));
                    continue;
                }
            };
            let purpose = file.purpose.clone();
            let content = file.content.clone();
            if let Err(e) = self.state.record_file(file) {
                skipped.push(json!({"path": path, "error": e.to_string()}));
                continue;
            }
            self.events.emit(GenerationEvent::FileGenerated {
                path: path.clone(),
                purpose,
            });
            accepted.push(SandboxFile::new(path, content));
        }
        (accepted, skipped)
    }
}

/// Access to the session's sandbox instance.
pub struct SandboxCapability<'a> {
    pub service: &'a dyn SandboxService,
    pub run_id: &'a str,
    pub review_commands: &'a [String],
    pub command_timeout: Option<Duration>,
    pub deploy_on_finalize: bool,
}

impl SandboxCapability<'_> {
    /// Write files, folding any failure into a payload fragment.
    async fn sync(&self, files: &[SandboxFile], message: &str) -> Value {
        if files.is_empty() {
            return json!({"written": 0, "failed": []});
        }
        match self.service.write_files(self.run_id, files, Some(message)).await {
            Ok(outcome) => {
                let failed: Vec<Value> = outcome
                    .failed()
                    .into_iter()
                    .map(|r| json!({"file": r.file, "error": r.error}))
                    .collect();
                if !failed.is_empty() {
                    warn!("{} of {} files failed to write", failed.len(), files.len());
                }
                json!({"written": files.len() - failed.len(), "failed": failed})
            }
            Err(e) => {
                warn!("Sandbox write failed: {}", e);
                json!({"written": 0, "error": e.to_string()})
            }
        }
    }

    async fn findings(&self) -> AgentResult<ReviewFindings> {
        let analysis = self.service.run_static_analysis(self.run_id, None).await?;
        let runtime = self.service.get_instance_errors(self.run_id).await?;
        let failed_commands = if self.review_commands.is_empty() {
            Vec::new()
        } else {
            self.service
                .execute_commands(self.run_id, self.review_commands, self.command_timeout)
                .await?
                .results
                .into_iter()
                .filter(|r| !r.success)
                .collect()
        };
        Ok(ReviewFindings {
            analysis,
            runtime_errors: runtime.errors,
            failed_commands,
        })
    }
}

/// Run a validated tool.
pub async fn execute(
    invocation: ToolInvocation,
    phase: &mut PhaseCapability<'_>,
    sandbox: &SandboxCapability<'_>,
) -> AgentResult<Value> {
    debug!("Running tool {}", invocation.tool());
    match invocation {
        ToolInvocation::PlanNextPhase => plan_next_phase(phase).await,
        ToolInvocation::ImplementCurrentPhase => implement_current_phase(phase, sandbox).await,
        ToolInvocation::ReviewAndFixCode => review_and_fix_code(phase, sandbox).await,
        ToolInvocation::FinalizeProject => finalize_project(phase, sandbox).await,
        ToolInvocation::GetProjectStatus => get_project_status(phase.state),
        ToolInvocation::ReadFile { file_path } => Ok(read_file(phase.state, &file_path)),
    }
}

/// Plan the next phase and move to PLANNING.
pub async fn plan_next_phase(phase: &mut PhaseCapability<'_>) -> AgentResult<Value> {
    phase.state.check(DevAction::PlanNextPhase)?;
    if let Some(open) = phase.state.current_phase() {
        return Err(CoreError::InvalidState(format!("phase '{}' is still in progress", open.name)).into());
    }
    if phase.state.phases().len() >= phase.max_phases {
        return Err(AgentError::NothingToPlan(format!(
            "phase limit of {} reached",
            phase.max_phases
        )));
    }

    let concept = phase
        .generator
        .plan_phase(phase.state)
        .await?
        .ok_or_else(|| AgentError::NothingToPlan("all planned phases are implemented".to_string()))?;

    phase.state.start_phase(&concept)?;
    let state = phase.transition(DevAction::PlanNextPhase)?;

    let files: Vec<String> = concept.files.iter().map(|f| f.path.clone()).collect();
    info!("Planned phase '{}' with {} files", concept.name, files.len());
    phase.events.emit(GenerationEvent::PhasePlanned {
        phase: concept.name.clone(),
        files: files.clone(),
    });

    Ok(json!({
        "success": true,
        "currentState": state,
        "phase": {
            "name": concept.name,
            "description": concept.description,
            "files": concept.files,
        }
    }))
}

/// Generate the open phase's files and move to IMPLEMENTING.
pub async fn implement_current_phase(
    phase: &mut PhaseCapability<'_>,
    sandbox: &SandboxCapability<'_>,
) -> AgentResult<Value> {
    phase.state.check(DevAction::ImplementCurrentPhase)?;
    let concept = phase
        .state
        .current_phase()
        .map(|p| p.concept())
        .ok_or_else(|| CoreError::NoActivePhase("nothing has been planned".to_string()))?;

    phase.events.emit(GenerationEvent::PhaseImplementing {
        phase: concept.name.clone(),
    });
    let generated = phase.generator.implement_phase(phase.state, &concept).await?;
    let (files, skipped) = phase.record(generated);
    let written = sandbox
        .sync(&files, &format!("Implement phase: {}", concept.name))
        .await;

    let state = phase.transition(DevAction::ImplementCurrentPhase)?;
    info!("Implemented phase '{}' ({} files)", concept.name, files.len());
    phase.events.emit(GenerationEvent::PhaseImplemented {
        phase: concept.name.clone(),
        files: files.len(),
    });

    Ok(json!({
        "success": true,
        "currentState": state,
        "phase": concept.name,
        "files": files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(),
        "skipped": skipped,
        "sandbox": written,
    }))
}

/// Review and fix the open phase, complete it and move to REVIEWING.
///
/// Runs at most `review_cycles` analysis passes. A pass that comes back
/// clean, or for which the generator offers no fix, ends the review early.
/// The phase completes regardless of what remains.
pub async fn review_and_fix_code(
    phase: &mut PhaseCapability<'_>,
    sandbox: &SandboxCapability<'_>,
) -> AgentResult<Value> {
    phase.state.check(DevAction::ReviewAndFix)?;
    let name = phase
        .state
        .current_phase()
        .map(|p| p.name.clone())
        .ok_or_else(|| CoreError::NoActivePhase("nothing has been implemented".to_string()))?;

    let mut cycles = 0;
    let mut fixed: Vec<String> = Vec::new();
    let mut remaining = 0;
    let mut problems: Vec<String> = Vec::new();

    while cycles < phase.review_cycles {
        let findings = match sandbox.findings().await {
            Ok(findings) => findings,
            Err(e) => {
                warn!("Review of '{}' could not collect findings: {}", name, e);
                problems.push(e.to_string());
                break;
            }
        };
        cycles += 1;
        remaining = findings.issue_count();
        if findings.is_clean() {
            break;
        }
        debug!("Review cycle {} of '{}': {} issues", cycles, name, remaining);

        let fixes = match phase.generator.fix_issues(phase.state, &findings).await {
            Ok(fixes) if fixes.is_empty() => break,
            Ok(fixes) => fixes,
            Err(e) => {
                warn!("Fix generation failed for '{}': {}", name, e);
                problems.push(e.to_string());
                break;
            }
        };

        let (files, skipped) = phase.record(fixes);
        problems.extend(skipped.iter().filter_map(|s| s["error"].as_str().map(String::from)));
        fixed.extend(files.iter().map(|f| f.path.clone()));
        let written = sandbox.sync(&files, &format!("Review fixes: {}", name)).await;
        if let Some(error) = written["error"].as_str() {
            problems.push(error.to_string());
        }
        if let Err(e) = sandbox.service.clear_instance_errors(sandbox.run_id).await {
            debug!("Could not clear runtime errors: {}", e);
        }
    }

    let state = phase.transition(DevAction::ReviewAndFix)?;
    phase.state.complete_current_phase()?;
    fixed.sort();
    fixed.dedup();

    info!(
        "Reviewed phase '{}': {} cycles, {} issues remaining",
        name, cycles, remaining
    );
    phase.events.emit(GenerationEvent::ReviewCompleted {
        phase: name.clone(),
        cycles,
        remaining_issues: remaining,
    });

    Ok(json!({
        "success": true,
        "currentState": state,
        "phase": name,
        "cycles": cycles,
        "fixedFiles": fixed,
        "remainingIssues": remaining,
        "problems": problems,
    }))
}

/// Write the README, optionally deploy, and return to IDLE.
///
/// Also completes a finalization that was interrupted in FINALIZING.
pub async fn finalize_project(
    phase: &mut PhaseCapability<'_>,
    sandbox: &SandboxCapability<'_>,
) -> AgentResult<Value> {
    phase.state.check(DevAction::Finalize)?;

    let mut written = Value::Null;
    if phase.state.current_state() == DevState::Reviewing {
        let readme = phase.generator.readme(phase.state).await?;
        phase.transition(DevAction::Finalize)?;
        let (files, _) = phase.record(vec![readme]);
        written = sandbox.sync(&files, "Add README").await;
    }

    let mut deployed_url = None;
    if sandbox.deploy_on_finalize {
        match sandbox.service.deploy(sandbox.run_id).await {
            Ok(deployment) => {
                info!("Deployed to {}", deployment.deployed_url);
                phase.events.emit(GenerationEvent::DeploymentCompleted {
                    url: deployment.deployed_url.clone(),
                });
                deployed_url = Some(deployment.deployed_url);
            }
            Err(e) => warn!("Deployment skipped: {}", e),
        }
    }

    let state = phase.transition(DevAction::Finalize)?;
    let total_files = phase.state.file_count();
    let phases = phase.state.completed_phase_count();
    info!("Project finalized: {} files, {} phases", total_files, phases);
    phase.events.emit(GenerationEvent::GenerationComplete { total_files, phases });

    Ok(json!({
        "success": true,
        "currentState": state,
        "totalFiles": total_files,
        "phases": phases,
        "sandbox": written,
        "deployedUrl": deployed_url,
    }))
}

/// File names, phases and current state.
pub fn get_project_status(state: &GenerationState) -> AgentResult<Value> {
    let mut payload = serde_json::to_value(state.status())?;
    payload["success"] = Value::Bool(true);
    Ok(payload)
}

/// Content and purpose of one generated file.
pub fn read_file(state: &GenerationState, file_path: &str) -> Value {
    match state.file(file_path) {
        Some(file) => json!({"content": file.content, "purpose": file.purpose}),
        None => json!({"error": "File not found"}),
    }
}

/// Payload reported to the model for a failed tool call.
pub fn error_payload(error: &AgentError) -> Value {
    let kind = if error.is_validation() {
        "validation"
    } else if error.is_state_error() {
        "state"
    } else if matches!(error, AgentError::Sandbox(_)) {
        "sandbox"
    } else if error.is_inference() {
        "inference"
    } else {
        "generation"
    };
    json!({"success": false, "error": error.to_string(), "kind": kind})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::BlueprintGenerator;
    use kiln_core::{Blueprint, GenerationMode, PhaseConcept, RecordingSink};
    use kiln_sandbox::{
        AnalysisSection, CodeIssue, CreateInstanceRequest, LocalSandboxService, StaticAnalysis,
    };
    use std::sync::Arc;

    struct Fixture {
        state: GenerationState,
        sandbox: LocalSandboxService,
        run_id: String,
        sink: Arc<RecordingSink>,
        events: EventEmitter,
        generator: BlueprintGenerator,
    }

    impl Fixture {
        async fn new() -> Self {
            let blueprint = Blueprint::new("Todo", "todo", "minimal-js")
                .phase(PhaseConcept::new("Core", "Model").file("src/model.ts", "Todo model"));
            let sandbox = LocalSandboxService::new("s1");
            let info = sandbox
                .create_instance(CreateInstanceRequest::new("minimal-js", "todo"))
                .await
                .unwrap();
            let sink = Arc::new(RecordingSink::new());
            Self {
                state: GenerationState::new("s1", "todo", blueprint, GenerationMode::Directed),
                sandbox,
                run_id: info.run_id,
                events: EventEmitter::new("s1", sink.clone()),
                sink,
                generator: BlueprintGenerator::new(),
            }
        }

        async fn run(&mut self, invocation: ToolInvocation) -> AgentResult<Value> {
            let mut phase = PhaseCapability {
                state: &mut self.state,
                generator: &self.generator,
                events: &self.events,
                review_cycles: 3,
                max_phases: 12,
            };
            let sandbox = SandboxCapability {
                service: &self.sandbox,
                run_id: &self.run_id,
                review_commands: &[],
                command_timeout: None,
                deploy_on_finalize: true,
            };
            execute(invocation, &mut phase, &sandbox).await
        }
    }

    #[test]
    fn test_registry_validates_arguments() {
        let registry = ToolRegistry::new().unwrap();
        assert_eq!(registry.schemas().len(), 6);

        let ok = registry
            .validate("read_file", &json!({"filePath": "src/a.ts"}))
            .unwrap();
        assert_eq!(ok, ToolInvocation::ReadFile { file_path: "src/a.ts".to_string() });

        let missing = registry.validate("read_file", &json!({})).unwrap_err();
        assert!(missing.is_validation());

        let wrong_type = registry.validate("read_file", &json!({"filePath": 3})).unwrap_err();
        assert!(matches!(wrong_type, AgentError::InvalidArguments { .. }));

        let unknown = registry.validate("delete_everything", &json!({})).unwrap_err();
        assert!(matches!(unknown, AgentError::UnknownTool(_)));

        assert_eq!(
            registry.validate("plan_next_phase", &Value::Null).unwrap(),
            ToolInvocation::PlanNextPhase
        );
    }

    #[test]
    fn test_turn_rejects_duplicate_calls() {
        let registry = ToolRegistry::new().unwrap();
        let mut turn = ToolTurn::new();

        assert!(turn.admit(&registry, &ToolCall::bare("get_project_status")).is_ok());
        let err = turn
            .admit(&registry, &ToolCall::bare("get_project_status"))
            .unwrap_err();
        assert!(matches!(err, AgentError::DuplicateToolCall(_)));
        assert_eq!(error_payload(&err)["kind"], "validation");
    }

    #[tokio::test]
    async fn test_tools_walk_one_phase() {
        let mut fx = Fixture::new().await;

        let planned = fx.run(ToolInvocation::PlanNextPhase).await.unwrap();
        assert_eq!(planned["currentState"], "PLANNING");
        assert_eq!(planned["phase"]["name"], "Core");

        let implemented = fx.run(ToolInvocation::ImplementCurrentPhase).await.unwrap();
        assert_eq!(implemented["files"], json!(["src/model.ts"]));
        assert_eq!(implemented["sandbox"]["written"], 1);

        let files = fx
            .sandbox
            .get_files(&fx.run_id, Some(&["src/model.ts".to_string()]))
            .await
            .unwrap();
        assert!(files.get("src/model.ts").unwrap().contains("Todo model"));

        let reviewed = fx.run(ToolInvocation::ReviewAndFixCode).await.unwrap();
        assert_eq!(reviewed["currentState"], "REVIEWING");
        assert_eq!(reviewed["cycles"], 1);
        assert!(fx.state.phases()[0].completed);

        let finalized = fx.run(ToolInvocation::FinalizeProject).await.unwrap();
        assert_eq!(finalized["currentState"], "IDLE");
        assert!(finalized["deployedUrl"].as_str().unwrap().ends_with(".mock.deploy"));
        assert!(fx.state.is_finalized());
        assert!(fx.state.file("README.md").is_some());

        assert_eq!(fx.sink.count("state_changed"), 5);
        assert_eq!(fx.sink.count("generation_complete"), 1);
    }

    #[tokio::test]
    async fn test_illegal_tool_leaves_state() {
        let mut fx = Fixture::new().await;

        let err = fx.run(ToolInvocation::ReviewAndFixCode).await.unwrap_err();
        assert!(err.is_state_error());
        assert_eq!(fx.state.current_state(), DevState::Idle);
        assert_eq!(error_payload(&err)["kind"], "state");
        assert_eq!(fx.sink.count("state_changed"), 0);
    }

    #[tokio::test]
    async fn test_plan_rejects_when_roadmap_done() {
        let mut fx = Fixture::new().await;
        fx.run(ToolInvocation::PlanNextPhase).await.unwrap();
        fx.run(ToolInvocation::ImplementCurrentPhase).await.unwrap();
        fx.run(ToolInvocation::ReviewAndFixCode).await.unwrap();

        let err = fx.run(ToolInvocation::PlanNextPhase).await.unwrap_err();
        assert!(matches!(err, AgentError::NothingToPlan(_)));
        assert_eq!(fx.state.current_state(), DevState::Reviewing);
    }

    #[tokio::test]
    async fn test_review_reports_remaining_issues() {
        let mut fx = Fixture::new().await;
        fx.sandbox.set_static_analysis(StaticAnalysis {
            lint: AnalysisSection::from_issues(vec![CodeIssue::error("src/model.ts", 1, "no-unused-vars")]),
            ..Default::default()
        });
        fx.run(ToolInvocation::PlanNextPhase).await.unwrap();
        fx.run(ToolInvocation::ImplementCurrentPhase).await.unwrap();

        let reviewed = fx.run(ToolInvocation::ReviewAndFixCode).await.unwrap();
        // The blueprint generator offers no fixes, so one pass is enough.
        assert_eq!(reviewed["cycles"], 1);
        assert_eq!(reviewed["remainingIssues"], 1);
        assert_eq!(fx.state.current_state(), DevState::Reviewing);
    }

    #[tokio::test]
    async fn test_read_file_and_status() {
        let mut fx = Fixture::new().await;
        fx.run(ToolInvocation::PlanNextPhase).await.unwrap();
        fx.run(ToolInvocation::ImplementCurrentPhase).await.unwrap();

        let found = fx
            .run(ToolInvocation::ReadFile { file_path: "./src/model.ts".to_string() })
            .await
            .unwrap();
        assert_eq!(found["purpose"], "Todo model");

        let missing = fx
            .run(ToolInvocation::ReadFile { file_path: "nope.ts".to_string() })
            .await
            .unwrap();
        assert_eq!(missing, json!({"error": "File not found"}));

        let status = fx.run(ToolInvocation::GetProjectStatus).await.unwrap();
        assert_eq!(status["currentState"], "IMPLEMENTING");
        assert_eq!(status["files"], json!(["src/model.ts"]));
    }
}
