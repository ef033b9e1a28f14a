//! Integration tests for the orchestrator's drivers.

use std::sync::Arc;

use async_trait::async_trait;
use kiln_agent::{
    AgentError, AgentResult, BlueprintGenerator, FallbackReason, InferenceClient, InferenceRequest,
    InferenceResponse, Orchestrator, OrchestratorConfig, PhaseGenerator, ReviewFindings,
    ScriptedInference, Services, ToolCall,
};
use kiln_core::{
    Blueprint, CoreError, DevState, EventLogSink, FanoutSink, GeneratedFile,
    GenerationEvent, GenerationGuard, GenerationState, PhaseConcept, RecordingSink, StateStore,
};
use kiln_sandbox::{
    AnalysisSection, CodeIssue, LocalSandboxService, SandboxService, StaticAnalysis,
    WorkspaceSandboxService,
};
use mockall::mock;
use serde_json::{json, Value};
use tempfile::TempDir;

mock! {
    pub Inference {}

    #[async_trait]
    impl InferenceClient for Inference {
        async fn complete(&self, request: &InferenceRequest) -> AgentResult<InferenceResponse>;
    }
}

fn one_phase() -> Blueprint {
    Blueprint::new("Counter", "counter", "minimal-js")
        .phase(PhaseConcept::new("Core", "Counter logic").file("src/counter.ts", "Counter state"))
}

fn two_phases() -> Blueprint {
    one_phase().phase(PhaseConcept::new("UI", "Page").file("public/app.js", "Buttons"))
}

fn services(
    sandbox: Arc<dyn SandboxService>,
    inference: Option<Arc<dyn InferenceClient>>,
) -> (Services, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let services = Services {
        sandbox,
        generator: Arc::new(BlueprintGenerator::new()),
        inference,
        events: sink.clone(),
    };
    (services, sink)
}

fn tool_payloads(orchestrator: &Orchestrator) -> Vec<Value> {
    orchestrator
        .conversation()
        .iter()
        .filter(|m| m.tool_call_id.is_some())
        .map(|m| serde_json::from_str(&m.content).unwrap())
        .collect()
}

/// A scripted plan, implement, review, finalize session ends in four turns.
#[tokio::test]
async fn test_directed_session_finishes_in_four_turns() {
    let client = Arc::new(ScriptedInference::responses(vec![
        InferenceResponse::call("plan_next_phase").with_text("Planning the counter."),
        InferenceResponse::call("implement_current_phase"),
        InferenceResponse::call("review_and_fix_code"),
        InferenceResponse::call("finalize_project").with_text("Done."),
    ]));
    let inference: Arc<dyn InferenceClient> = client.clone();
    let (services, sink) = services(Arc::new(LocalSandboxService::new("s1")), Some(inference));

    let mut orchestrator =
        Orchestrator::initialize("s1", "a counter", one_phase(), OrchestratorConfig::directed(), services)
            .await
            .unwrap();
    let outcome = orchestrator.generate_all_files().await.unwrap();

    assert_eq!(outcome.turns, 4);
    assert!(outcome.fallback.is_none());
    assert_eq!(outcome.final_state, DevState::Idle);
    assert!(orchestrator.state().is_finalized());
    assert!(!orchestrator.guard().is_active());
    assert_eq!(client.call_count(), 4);

    let requests = client.requests();
    assert_eq!(requests[0].tools.len(), 6);
    assert_eq!(requests[3].metadata.turn, 4);
    assert_eq!(requests[3].metadata.current_state, "REVIEWING");

    assert_eq!(sink.count("conversation_reply"), 2);
    assert_eq!(sink.count("degraded"), 0);
    assert_eq!(sink.kinds().last(), Some(&"generation_complete"));
}

/// A model that never finalizes hits the turn ceiling and the
/// deterministic driver completes the project.
#[tokio::test]
async fn test_directed_ceiling_falls_back() {
    let client = Arc::new(ScriptedInference::repeating(InferenceResponse::call(
        "get_project_status",
    )));
    let inference: Arc<dyn InferenceClient> = client.clone();
    let (services, sink) = services(Arc::new(LocalSandboxService::new("s1")), Some(inference));

    let mut orchestrator =
        Orchestrator::initialize("s1", "a counter", two_phases(), OrchestratorConfig::directed(), services)
            .await
            .unwrap();
    let outcome = orchestrator.generate_all_files().await.unwrap();

    assert_eq!(outcome.turns, 20);
    assert_eq!(client.call_count(), 20);
    assert_eq!(outcome.fallback, Some(FallbackReason::IterationLimit));
    assert!(!outcome.files.is_empty());
    assert_eq!(outcome.phases, 2);
    assert_eq!(orchestrator.state().current_state(), DevState::Idle);
    assert_eq!(sink.count("degraded"), 1);
    assert!(!orchestrator.guard().is_active());
}

/// An inference failure is broadcast and the session still completes.
#[tokio::test]
async fn test_inference_error_falls_back() {
    let mut mock = MockInference::new();
    mock.expect_complete()
        .withf(|request| request.metadata.turn == 1)
        .times(1)
        .returning(|_| Err(AgentError::Inference("rate limited".to_string())));

    let inference: Arc<dyn InferenceClient> = Arc::new(mock);
    let (services, sink) = services(Arc::new(LocalSandboxService::new("s1")), Some(inference));
    let mut orchestrator =
        Orchestrator::initialize("s1", "a counter", one_phase(), OrchestratorConfig::directed(), services)
            .await
            .unwrap();
    let outcome = orchestrator.generate_all_files().await.unwrap();

    assert!(matches!(outcome.fallback, Some(FallbackReason::InferenceFailed(ref e)) if e.contains("rate limited")));
    assert_eq!(outcome.turns, 1);
    assert_eq!(sink.count("error"), 1);
    assert!(orchestrator.state().is_finalized());
    assert!(!orchestrator.guard().is_active());
}

/// Bad calls get error payloads and the loop keeps going.
#[tokio::test]
async fn test_invalid_tool_calls_are_reported() {
    let client: Arc<dyn InferenceClient> = Arc::new(ScriptedInference::responses(vec![
        InferenceResponse::calls(vec![
            ToolCall::bare("get_project_status"),
            ToolCall::bare("get_project_status"),
            ToolCall::new("read_file", json!({})),
            ToolCall::bare("deploy_to_production"),
            ToolCall::bare("review_and_fix_code"),
        ]),
        InferenceResponse::call("plan_next_phase"),
        InferenceResponse::call("implement_current_phase"),
        InferenceResponse::calls(vec![
            ToolCall::new("read_file", json!({"filePath": "src/counter.ts"})),
            ToolCall::bare("review_and_fix_code"),
        ]),
        InferenceResponse::call("finalize_project"),
    ]));
    let (services, _) = services(Arc::new(LocalSandboxService::new("s1")), Some(client));

    let mut orchestrator =
        Orchestrator::initialize("s1", "a counter", one_phase(), OrchestratorConfig::directed(), services)
            .await
            .unwrap();
    let outcome = orchestrator.generate_all_files().await.unwrap();
    assert_eq!(outcome.turns, 5);
    assert!(outcome.fallback.is_none());

    let payloads = tool_payloads(&orchestrator);
    assert_eq!(payloads[0]["success"], true);
    assert_eq!(payloads[1]["kind"], "validation");
    assert!(payloads[1]["error"].as_str().unwrap().contains("already called"));
    assert_eq!(payloads[2]["kind"], "validation");
    assert!(payloads[3]["error"].as_str().unwrap().contains("Unknown tool"));
    assert_eq!(payloads[4]["kind"], "state");
    assert_eq!(payloads[7]["purpose"], "Counter state");
}

/// A second run on the same session is rejected while the first holds
/// the guard.
#[tokio::test]
async fn test_double_entry_is_rejected() {
    let (services, _) = services(Arc::new(LocalSandboxService::new("s1")), None);
    let guard = GenerationGuard::new();
    let mut orchestrator =
        Orchestrator::initialize("s1", "a counter", one_phase(), OrchestratorConfig::default(), services)
            .await
            .unwrap()
            .with_guard(guard.clone());

    let held = guard.acquire().unwrap();
    let err = orchestrator.generate_all_files().await.unwrap_err();
    assert!(matches!(err, AgentError::Core(CoreError::GenerationInProgress)));
    assert_eq!(orchestrator.state().current_state(), DevState::Idle);

    drop(held);
    orchestrator.generate_all_files().await.unwrap();
    assert!(!guard.is_active());
}

/// Always proposes a fix, so only the cycle limit ends a review.
struct AlwaysFixing(BlueprintGenerator);

#[async_trait]
impl PhaseGenerator for AlwaysFixing {
    async fn plan_phase(&self, state: &GenerationState) -> AgentResult<Option<PhaseConcept>> {
        self.0.plan_phase(state).await
    }

    async fn implement_phase(
        &self,
        state: &GenerationState,
        phase: &PhaseConcept,
    ) -> AgentResult<Vec<GeneratedFile>> {
        self.0.implement_phase(state, phase).await
    }

    async fn fix_issues(
        &self,
        _state: &GenerationState,
        findings: &ReviewFindings,
    ) -> AgentResult<Vec<GeneratedFile>> {
        Ok(findings
            .analysis
            .all_issues()
            .map(|i| GeneratedFile::new(&i.file_path, "export const fixed = true;\n", "Fix"))
            .collect())
    }

    async fn readme(&self, state: &GenerationState) -> AgentResult<GeneratedFile> {
        self.0.readme(state).await
    }
}

#[tokio::test]
async fn test_review_cycles_are_bounded() {
    let sandbox = Arc::new(LocalSandboxService::new("s1"));
    sandbox.set_static_analysis(StaticAnalysis {
        typecheck: AnalysisSection::from_issues(vec![CodeIssue::error(
            "src/counter.ts",
            1,
            "Type 'string' is not assignable to type 'number'",
        )]),
        ..Default::default()
    });
    let sink = Arc::new(RecordingSink::new());
    let services = Services {
        sandbox: sandbox.clone(),
        generator: Arc::new(AlwaysFixing(BlueprintGenerator::new())),
        inference: None,
        events: sink.clone(),
    };

    let config = OrchestratorConfig::default().with_review_cycles(3);
    let mut orchestrator = Orchestrator::initialize("s1", "a counter", one_phase(), config, services)
        .await
        .unwrap();
    orchestrator.generate_all_files().await.unwrap();

    let reviews: Vec<(u32, usize)> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            GenerationEvent::ReviewCompleted { cycles, remaining_issues, .. } => {
                Some((cycles, remaining_issues))
            }
            _ => None,
        })
        .collect();
    assert_eq!(reviews, vec![(3, 1)]);
    assert_eq!(
        orchestrator.state().file("src/counter.ts").unwrap().content,
        "export const fixed = true;\n"
    );
    assert!(sandbox.get_method_calls("write_files").len() >= 4);
}

/// Events land in the session's event log and the state reloads.
#[tokio::test]
async fn test_session_is_persisted() {
    let temp = TempDir::new().unwrap();
    let store = StateStore::new(temp.path());
    let recording = Arc::new(RecordingSink::new());
    let events = FanoutSink::new()
        .with(recording.clone())
        .with(Arc::new(EventLogSink::new(StateStore::new(temp.path()))));

    let services = Services {
        sandbox: Arc::new(LocalSandboxService::new("s7")),
        generator: Arc::new(BlueprintGenerator::new()),
        inference: None,
        events: Arc::new(events),
    };
    let mut orchestrator =
        Orchestrator::initialize("s7", "a counter", two_phases(), OrchestratorConfig::default(), services)
            .await
            .unwrap();
    orchestrator.generate_all_files().await.unwrap();
    store.save(orchestrator.state()).unwrap();

    let logged = store.load_events("s7").unwrap();
    assert_eq!(logged.len(), recording.records().len());
    assert_eq!(logged[0].event.kind(), "generation_started");

    let reloaded = store.load("s7").unwrap();
    assert!(reloaded.is_finalized());
    assert_eq!(reloaded.completed_phase_count(), 2);
}

/// The deterministic driver writes real files through the workspace backend.
#[tokio::test]
async fn test_deterministic_run_on_workspace_backend() {
    let temp = TempDir::new().unwrap();
    let workspace = Arc::new(WorkspaceSandboxService::new(temp.path()));
    let (services, _) = services(workspace.clone(), None);

    let config = OrchestratorConfig::default().with_review_command("test -f src/counter.ts");
    let mut orchestrator = Orchestrator::initialize("s1", "a counter", one_phase(), config, services)
        .await
        .unwrap();
    let outcome = orchestrator.generate_all_files().await.unwrap();
    assert_eq!(outcome.final_state, DevState::Idle);

    let run_id = orchestrator.state().sandbox().unwrap().run_id.clone();
    let dir = workspace.instance_dir(&run_id).unwrap();
    assert!(dir.join("src/counter.ts").exists());
    assert!(dir.join("README.md").exists());
    assert!(dir.join("package.json").exists());
}
