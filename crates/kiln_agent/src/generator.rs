//! Phase generators.
//!
//! A [`PhaseGenerator`] decides what the next phase is and produces its
//! files, fixes and README. Tools call it; it never touches the state
//! machine or the sandbox itself.

use std::sync::Arc;

use async_trait::async_trait;
use kiln_core::{FileConcept, GeneratedFile, GenerationState, PhaseConcept};
use kiln_sandbox::{CommandResult, RuntimeError, StaticAnalysis};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};
use crate::inference::{ChatMessage, InferenceClient, InferenceMetadata, InferenceRequest};

/// Everything a review pass found wrong.
#[derive(Debug, Clone, Default)]
pub struct ReviewFindings {
    pub analysis: StaticAnalysis,
    pub runtime_errors: Vec<RuntimeError>,
    pub failed_commands: Vec<CommandResult>,
}

impl ReviewFindings {
    pub fn is_clean(&self) -> bool {
        self.analysis.is_clean() && self.runtime_errors.is_empty() && self.failed_commands.is_empty()
    }

    /// Number of distinct problems.
    pub fn issue_count(&self) -> usize {
        self.analysis.all_issues().count() + self.runtime_errors.len() + self.failed_commands.len()
    }

    /// Plain-text listing, one problem per line.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for issue in self.analysis.all_issues() {
            lines.push(format!(
                "{}:{}:{} {:?}: {}",
                issue.file_path, issue.line, issue.column, issue.severity, issue.message
            ));
        }
        for error in &self.runtime_errors {
            match &error.file_path {
                Some(path) => lines.push(format!("runtime error in {}: {}", path, error.message)),
                None => lines.push(format!("runtime error: {}", error.message)),
            }
        }
        for command in &self.failed_commands {
            lines.push(format!(
                "command `{}` exited with {}: {}",
                command.command,
                command.exit_code,
                command.output.trim()
            ));
        }
        lines.join("\n")
    }
}

/// Produces phase plans and file contents.
#[async_trait]
pub trait PhaseGenerator: Send + Sync {
    /// The next phase to build, or `None` when the project is complete.
    async fn plan_phase(&self, state: &GenerationState) -> AgentResult<Option<PhaseConcept>>;

    /// Files for the given phase.
    async fn implement_phase(
        &self,
        state: &GenerationState,
        phase: &PhaseConcept,
    ) -> AgentResult<Vec<GeneratedFile>>;

    /// Replacement files addressing review findings. Empty means no fix.
    async fn fix_issues(
        &self,
        state: &GenerationState,
        findings: &ReviewFindings,
    ) -> AgentResult<Vec<GeneratedFile>>;

    /// Project README written during finalization.
    async fn readme(&self, state: &GenerationState) -> AgentResult<GeneratedFile>;
}

/// Walks the blueprint roadmap and emits placeholder sources.
///
/// Works offline and is fully deterministic, so it backs the deterministic
/// driver and every test that does not care about file contents.
#[derive(Debug, Clone, Default)]
pub struct BlueprintGenerator;

impl BlueprintGenerator {
    pub fn new() -> Self {
        Self
    }

    fn stub(state: &GenerationState, phase: &PhaseConcept, path: &str, purpose: &str) -> String {
        let project = &state.blueprint().project_name;
        let extension = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
        match extension {
            "ts" | "tsx" | "js" | "jsx" | "mjs" => format!(
                "// {}\n// {} / {}\n\nexport {{}};\n",
                purpose, project, phase.name
            ),
            "json" | "jsonc" => "{}\n".to_string(),
            "css" => format!("/* {} */\n", purpose),
            "html" => format!(
                "<!doctype html>\n<html>\n  <head><title>{}</title></head>\n  <body><!-- {} --></body>\n</html>\n",
                state.blueprint().title,
                purpose
            ),
            "md" => format!("# {}\n\n{}\n", phase.name, purpose),
            _ => format!("# {}\n", purpose),
        }
    }
}

#[async_trait]
impl PhaseGenerator for BlueprintGenerator {
    async fn plan_phase(&self, state: &GenerationState) -> AgentResult<Option<PhaseConcept>> {
        let roadmap = &state.blueprint().implementation_roadmap;
        let planned = state.phases().len();

        if roadmap.is_empty() {
            return Ok((planned == 0).then(|| {
                PhaseConcept::new("Initial implementation", state.query())
                    .file("src/index.ts", "Application entry point")
            }));
        }
        Ok(roadmap.get(planned).cloned())
    }

    async fn implement_phase(
        &self,
        state: &GenerationState,
        phase: &PhaseConcept,
    ) -> AgentResult<Vec<GeneratedFile>> {
        Ok(phase
            .files
            .iter()
            .map(|f| GeneratedFile::new(&f.path, Self::stub(state, phase, &f.path, &f.purpose), &f.purpose))
            .collect())
    }

    async fn fix_issues(
        &self,
        _state: &GenerationState,
        findings: &ReviewFindings,
    ) -> AgentResult<Vec<GeneratedFile>> {
        debug!("Blueprint generator leaves {} issues unfixed", findings.issue_count());
        Ok(Vec::new())
    }

    async fn readme(&self, state: &GenerationState) -> AgentResult<GeneratedFile> {
        let blueprint = state.blueprint();
        let mut content = format!("# {}\n\n", blueprint.title);
        if !blueprint.description.is_empty() {
            content.push_str(&blueprint.description);
            content.push_str("\n\n");
        }
        if !blueprint.frameworks.is_empty() {
            content.push_str("## Stack\n\n");
            for framework in &blueprint.frameworks {
                content.push_str(&format!("- {}\n", framework));
            }
            content.push('\n');
        }
        content.push_str("## Phases\n\n");
        for phase in state.phases() {
            content.push_str(&format!("- **{}**: {}\n", phase.name, phase.description));
        }
        content.push_str("\n## Files\n\n");
        for file in state.generated_files() {
            content.push_str(&format!("- `{}`: {}\n", file.path, file.purpose));
        }
        Ok(GeneratedFile::new("README.md", content, "Project documentation"))
    }
}

const GENERATOR_PROMPT: &str = "You are a senior engineer generating a web project phase by phase. \
Reply with JSON only, no prose and no code fences.";

/// Generator backed by the inference boundary.
///
/// Every call is a single tool-less request whose reply must be JSON (or
/// Markdown for the README).
pub struct LlmPhaseGenerator {
    client: Arc<dyn InferenceClient>,
}

#[derive(Debug, Deserialize)]
struct PlannedPhase {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    files: Vec<FileConcept>,
}

#[derive(Debug, Deserialize)]
struct FilePayload {
    files: Vec<FileBody>,
}

#[derive(Debug, Deserialize)]
struct FileBody {
    path: String,
    content: String,
    #[serde(default)]
    purpose: String,
}

impl LlmPhaseGenerator {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }

    async fn ask(&self, state: &GenerationState, prompt: String) -> AgentResult<String> {
        let request = InferenceRequest {
            messages: vec![ChatMessage::system(GENERATOR_PROMPT), ChatMessage::user(prompt)],
            tools: Vec::new(),
            metadata: InferenceMetadata {
                session_id: state.session_id().to_string(),
                turn: 0,
                current_state: state.current_state().to_string(),
            },
        };
        let response = self.client.complete(&request).await?;
        response
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AgentError::Generation("model returned no content".to_string()))
    }

    fn context(state: &GenerationState) -> String {
        let blueprint = serde_json::to_string_pretty(state.blueprint()).unwrap_or_default();
        let phases: Vec<String> = state
            .phases()
            .iter()
            .map(|p| format!("- {} ({} files, completed: {})", p.name, p.files.len(), p.completed))
            .collect();
        format!(
            "Request: {}\n\nBlueprint:\n{}\n\nPhases so far:\n{}\n",
            state.query(),
            blueprint,
            if phases.is_empty() { "none".to_string() } else { phases.join("\n") }
        )
    }

    fn files(reply: &str) -> AgentResult<Vec<GeneratedFile>> {
        let payload: FilePayload = parse_json(reply)?;
        Ok(payload
            .files
            .into_iter()
            .map(|f| GeneratedFile::new(f.path, f.content, f.purpose))
            .collect())
    }
}

#[async_trait]
impl PhaseGenerator for LlmPhaseGenerator {
    async fn plan_phase(&self, state: &GenerationState) -> AgentResult<Option<PhaseConcept>> {
        let prompt = format!(
            "{}\nPlan the next phase. Reply {{\"name\": ..., \"description\": ..., \
             \"files\": [{{\"path\": ..., \"purpose\": ...}}]}} or {{\"done\": true}} \
             when the project is complete.",
            Self::context(state)
        );
        let planned: PlannedPhase = parse_json(&self.ask(state, prompt).await?)?;
        if planned.done || planned.name.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(PhaseConcept {
            name: planned.name,
            description: planned.description,
            files: planned.files,
        }))
    }

    async fn implement_phase(
        &self,
        state: &GenerationState,
        phase: &PhaseConcept,
    ) -> AgentResult<Vec<GeneratedFile>> {
        let plan = serde_json::to_string_pretty(phase)?;
        let prompt = format!(
            "{}\nImplement this phase:\n{}\nReply {{\"files\": [{{\"path\": ..., \"content\": ..., \
             \"purpose\": ...}}]}} with complete file contents.",
            Self::context(state),
            plan
        );
        Self::files(&self.ask(state, prompt).await?)
    }

    async fn fix_issues(
        &self,
        state: &GenerationState,
        findings: &ReviewFindings,
    ) -> AgentResult<Vec<GeneratedFile>> {
        let mut sources = String::new();
        for issue in findings.analysis.all_issues() {
            if let Some(file) = state.file(&issue.file_path) {
                if !sources.contains(&format!("--- {}", file.path)) {
                    sources.push_str(&format!("--- {}\n{}\n", file.path, file.content));
                }
            }
        }
        let prompt = format!(
            "{}\nFix these problems:\n{}\n\nAffected sources:\n{}\nReply {{\"files\": [...]}} \
             with full replacement contents, or {{\"files\": []}} if nothing can be fixed.",
            Self::context(state),
            findings.summary(),
            sources
        );
        Self::files(&self.ask(state, prompt).await?)
    }

    async fn readme(&self, state: &GenerationState) -> AgentResult<GeneratedFile> {
        let files: Vec<&str> = state.generated_files().map(|f| f.path.as_str()).collect();
        let prompt = format!(
            "{}\nFiles: {}\nWrite the project README in Markdown. Reply with the Markdown only.",
            Self::context(state),
            files.join(", ")
        );
        let content = strip_fences(&self.ask(state, prompt).await?).to_string();
        Ok(GeneratedFile::new("README.md", content, "Project documentation"))
    }
}

/// Remove a surrounding Markdown code fence, if any.
fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) on the opening line.
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a model reply as JSON, tolerating fences and surrounding prose.
pub(crate) fn parse_json<T: for<'de> Deserialize<'de>>(reply: &str) -> AgentResult<T> {
    let body = strip_fences(reply);
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => {
            let start = body.find('{');
            let end = body.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => serde_json::from_str(&body[start..=end])
                    .map_err(|e| AgentError::Generation(format!("invalid JSON from model: {}", e)))?,
                _ => {
                    warn!("Model reply is not JSON: {}", body.chars().take(120).collect::<String>());
                    return Err(AgentError::Generation("model reply is not JSON".to_string()));
                }
            }
        }
    };
    serde_json::from_value(value)
        .map_err(|e| AgentError::Generation(format!("unexpected JSON shape from model: {}", e)))
}
