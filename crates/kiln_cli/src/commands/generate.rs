//! Generate command - Run a generation session end to end.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use kiln_agent::{
    BlueprintGenerator, InferenceClient, KilnConfig, LlmAdapter, LlmPhaseGenerator, Orchestrator,
    PhaseGenerator, Services,
};
use kiln_core::{
    Blueprint, EventLogSink, EventRecord, EventSink, FanoutSink, GenerationEvent, GenerationMode,
    StateStore,
};
use kiln_sandbox::{create_sandbox_service, SandboxBackend, SandboxService};
use tracing::{info, warn};

#[derive(Args)]
pub struct GenerateArgs {
    /// What to build
    query: String,

    /// Blueprint file (JSON or YAML)
    #[arg(short, long)]
    blueprint: Option<PathBuf>,

    /// Generation mode (deterministic, directed)
    #[arg(short, long)]
    mode: Option<String>,

    /// Template to start from (overrides the blueprint)
    #[arg(short, long)]
    template: Option<String>,

    /// Sandbox backend (local, workspace, remote)
    #[arg(long)]
    backend: Option<String>,

    /// Analysis/fix passes per review
    #[arg(long)]
    review_cycles: Option<u32>,

    /// Deploy the project after finalizing
    #[arg(long)]
    deploy: bool,

    /// Let the model write file contents instead of placeholders
    #[arg(long)]
    llm_files: bool,

    /// Copy the finished project to this directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Config file (defaults to .kiln/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Logs progress events as they happen.
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, record: EventRecord) {
        match &record.event {
            GenerationEvent::PhasePlanned { phase, files } => {
                info!("Planned '{}' ({} files)", phase, files.len())
            }
            GenerationEvent::FileGenerated { path, .. } => info!("  + {}", path),
            GenerationEvent::ReviewCompleted {
                phase,
                cycles,
                remaining_issues,
            } => info!(
                "Reviewed '{}' in {} cycles, {} issues left",
                phase, cycles, remaining_issues
            ),
            GenerationEvent::ConversationReply { message, .. } => info!("> {}", message),
            GenerationEvent::Degraded { reason } => warn!("Degraded: {}", reason),
            GenerationEvent::Error { error } => warn!("Error: {}", error),
            _ => {}
        }
    }
}

pub async fn execute(args: GenerateArgs) -> Result<()> {
    let root = std::env::current_dir()?;
    let mut config = match &args.config {
        Some(path) => {
            let mut config = KilnConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            config.apply_env()?;
            config
        }
        None => KilnConfig::load(&root).context("Failed to load config")?,
    };

    if let Some(mode) = &args.mode {
        config.generation.mode = mode.parse::<GenerationMode>()?;
    }
    if let Some(backend) = &args.backend {
        config.sandbox.backend = backend.parse::<SandboxBackend>()?;
    }
    if let Some(cycles) = args.review_cycles {
        config.generation.review_cycles = cycles;
    }
    if args.deploy {
        config.generation.deploy_on_finalize = true;
    }

    let mut blueprint = match &args.blueprint {
        Some(path) => Blueprint::load(path)
            .with_context(|| format!("Failed to load blueprint {}", path.display()))?,
        None => default_blueprint(&args.query),
    };
    if let Some(template) = &args.template {
        blueprint.template = template.clone();
    }

    let session_id = format!("session-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S"));
    info!("Starting {} ({} mode)", session_id, config.generation.mode);

    let sandbox = create_sandbox_service(&config.sandbox, &session_id)?;
    let inference = match config.generation.mode {
        GenerationMode::Directed => match LlmAdapter::from_config(&config.llm) {
            Ok(adapter) => {
                info!("Using {:?} model {}", adapter.provider(), adapter.model());
                Some(Arc::new(adapter) as Arc<dyn InferenceClient>)
            }
            Err(e) => {
                warn!("{}; running deterministically", e);
                None
            }
        },
        GenerationMode::Deterministic => None,
    };
    let generator: Arc<dyn PhaseGenerator> = match (&inference, args.llm_files) {
        (Some(client), true) => Arc::new(LlmPhaseGenerator::new(client.clone())),
        _ => Arc::new(BlueprintGenerator::new()),
    };

    let store = StateStore::new(&root);
    let events = FanoutSink::new()
        .with(Arc::new(ConsoleSink))
        .with(Arc::new(EventLogSink::new(StateStore::new(&root))));

    let services = Services {
        sandbox: sandbox.clone(),
        generator,
        inference,
        events: Arc::new(events),
    };

    let mut orchestrator = Orchestrator::initialize(
        &session_id,
        &args.query,
        blueprint,
        config.orchestrator_config(),
        services,
    )
    .await?;

    let result = orchestrator.generate_all_files().await;
    let saved = store.save(orchestrator.state())?;
    let outcome = result?;

    if let Some(output) = &args.output {
        let run_id = orchestrator
            .state()
            .sandbox()
            .map(|s| s.run_id.clone())
            .unwrap_or_default();
        let count = export(sandbox.as_ref(), &run_id, output).await?;
        println!("Exported {} files to {}", count, output.display());
    }

    println!("Session {} finished", session_id);
    println!("  State:  {}", outcome.final_state);
    println!("  Phases: {}", outcome.phases);
    println!("  Files:  {}", outcome.files.len());
    if outcome.turns > 0 {
        println!("  Turns:  {}", outcome.turns);
    }
    if let Some(reason) = &outcome.fallback {
        println!("  Fallback: {}", reason);
    }
    if let Some(binding) = orchestrator.state().sandbox() {
        println!("  Preview: {}", binding.preview_url);
    }
    println!("  Saved:  {}", saved.display());

    Ok(())
}

/// A single-phase blueprint built from the request alone.
fn default_blueprint(query: &str) -> Blueprint {
    let slug: String = query
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(4)
        .collect::<Vec<_>>()
        .join("-");
    let name = if slug.is_empty() { "kiln-project".to_string() } else { slug };
    Blueprint::new(query, name, "minimal-js").description(query)
}

/// Copy every file of the instance into `output`.
async fn export(sandbox: &dyn SandboxService, run_id: &str, output: &Path) -> Result<usize> {
    let files = sandbox
        .get_files(run_id, None)
        .await
        .context("Failed to read project files from sandbox")?;

    for file in &files.files {
        let target = output.join(&file.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &file.content)
            .with_context(|| format!("Failed to write {}", target.display()))?;
    }
    Ok(files.files.len())
}
