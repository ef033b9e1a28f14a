//! Generation state aggregate.
//!
//! One [`GenerationState`] exists per session and is owned by the session's
//! orchestrator. Fields are private; every mutation goes through a method
//! that keeps the state machine and the recorded contents consistent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kiln_sandbox::normalize_path;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blueprint::{Blueprint, FileConcept, PhaseConcept};
use crate::error::{CoreError, CoreResult};
use crate::state::{transition, DevAction, DevState};

/// How the session is driven. Fixed for the session lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Fixed plan, implement, review sequence.
    #[default]
    Deterministic,
    /// An LLM picks the next tool each turn.
    Directed,
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deterministic => write!(f, "deterministic"),
            Self::Directed => write!(f, "directed"),
        }
    }
}

impl std::str::FromStr for GenerationMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deterministic" => Ok(Self::Deterministic),
            "directed" | "smart" => Ok(Self::Directed),
            other => Err(CoreError::InvalidState(format!("unknown generation mode '{}'", other))),
        }
    }
}

/// A file produced during generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
    pub purpose: String,
}

impl GeneratedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            purpose: purpose.into(),
        }
    }
}

/// A planned phase and its progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub name: String,
    pub description: String,
    /// Files the plan expects this phase to produce.
    #[serde(default)]
    pub planned_files: Vec<FileConcept>,
    /// Paths of files produced by this phase.
    pub files: Vec<String>,
    pub completed: bool,
}

impl PhaseRecord {
    /// The plan this phase was started from.
    pub fn concept(&self) -> PhaseConcept {
        PhaseConcept {
            name: self.name.clone(),
            description: self.description.clone(),
            files: self.planned_files.clone(),
        }
    }
}

impl From<&PhaseConcept> for PhaseRecord {
    fn from(concept: &PhaseConcept) -> Self {
        Self {
            name: concept.name.clone(),
            description: concept.description.clone(),
            planned_files: concept.files.clone(),
            files: Vec::new(),
            completed: false,
        }
    }
}

/// The sandbox instance a session writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxBinding {
    pub run_id: String,
    pub preview_url: String,
    pub template: String,
}

/// Pure summary returned to status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    pub current_state: DevState,
    pub files: Vec<String>,
    pub phases: Vec<PhaseRecord>,
    pub total_files: usize,
    pub completed_phases: usize,
    pub finalized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxBinding>,
}

/// Complete state of one generation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationState {
    session_id: String,
    query: String,
    blueprint: Blueprint,
    generated_files: BTreeMap<String, GeneratedFile>,
    phases: Vec<PhaseRecord>,
    current_state: DevState,
    mode: GenerationMode,
    #[serde(default)]
    sandbox: Option<SandboxBinding>,
    #[serde(default)]
    finalized_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GenerationState {
    pub fn new(
        session_id: impl Into<String>,
        query: impl Into<String>,
        blueprint: Blueprint,
        mode: GenerationMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            query: query.into(),
            blueprint,
            generated_files: BTreeMap::new(),
            phases: Vec::new(),
            current_state: DevState::Idle,
            mode,
            sandbox: None,
            finalized_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    pub fn current_state(&self) -> DevState {
        self.current_state
    }

    pub fn phases(&self) -> &[PhaseRecord] {
        &self.phases
    }

    pub fn sandbox(&self) -> Option<&SandboxBinding> {
        self.sandbox.as_ref()
    }

    pub fn generated_files(&self) -> impl Iterator<Item = &GeneratedFile> {
        self.generated_files.values()
    }

    pub fn file_count(&self) -> usize {
        self.generated_files.len()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Look up a generated file by any equivalent spelling of its path.
    pub fn file(&self, path: &str) -> Option<&GeneratedFile> {
        let key = normalize_path(path).ok()?;
        self.generated_files.get(&key)
    }

    /// The phase currently being worked on, if any.
    pub fn current_phase(&self) -> Option<&PhaseRecord> {
        self.phases.last().filter(|p| !p.completed)
    }

    pub fn completed_phase_count(&self) -> usize {
        self.phases.iter().filter(|p| p.completed).count()
    }

    /// True once any phase has been planned.
    pub fn has_started(&self) -> bool {
        !self.phases.is_empty() || self.current_state != DevState::Idle
    }

    /// True once the project has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }

    /// Check an action is legal without applying it.
    pub fn check(&self, action: DevAction) -> CoreResult<DevState> {
        transition(self.current_state, action)
    }

    /// Apply a state transition, returning the new state.
    ///
    /// Finishing finalization marks the project finalized; planning a new
    /// phase afterwards clears the mark.
    pub fn apply(&mut self, action: DevAction) -> CoreResult<DevState> {
        let next = transition(self.current_state, action)?;
        debug!("{}: {} -> {}", self.session_id, self.current_state, next);
        match (self.current_state, next) {
            (DevState::Finalizing, DevState::Idle) => self.finalized_at = Some(Utc::now()),
            (_, DevState::Planning) => self.finalized_at = None,
            _ => {}
        }
        self.current_state = next;
        self.touch();
        Ok(next)
    }

    /// Append a new phase. Fails while another phase is still open.
    pub fn start_phase(&mut self, concept: &PhaseConcept) -> CoreResult<&PhaseRecord> {
        if let Some(open) = self.current_phase() {
            return Err(CoreError::InvalidState(format!(
                "phase '{}' is still in progress",
                open.name
            )));
        }
        self.phases.push(PhaseRecord::from(concept));
        self.touch();
        let index = self.phases.len() - 1;
        Ok(&self.phases[index])
    }

    /// Record a generated file, overwriting any previous content.
    ///
    /// The path is attributed to the open phase when there is one.
    pub fn record_file(&mut self, file: GeneratedFile) -> CoreResult<()> {
        let key = normalize_path(&file.path)?;
        if let Some(phase) = self.phases.last_mut().filter(|p| !p.completed) {
            if !phase.files.contains(&key) {
                phase.files.push(key.clone());
            }
        }
        self.generated_files.insert(
            key.clone(),
            GeneratedFile {
                path: key,
                ..file
            },
        );
        self.touch();
        Ok(())
    }

    /// Mark the open phase completed.
    pub fn complete_current_phase(&mut self) -> CoreResult<&PhaseRecord> {
        let index = match self.phases.last() {
            None => return Err(CoreError::NoActivePhase("no phase has been planned".to_string())),
            Some(phase) if phase.completed => {
                return Err(CoreError::PhaseAlreadyCompleted(phase.name.clone()))
            }
            Some(_) => self.phases.len() - 1,
        };
        self.phases[index].completed = true;
        self.touch();
        Ok(&self.phases[index])
    }

    pub fn bind_sandbox(&mut self, binding: SandboxBinding) {
        self.sandbox = Some(binding);
        self.touch();
    }

    /// Summary of files, phases and state.
    pub fn status(&self) -> ProjectStatus {
        ProjectStatus {
            current_state: self.current_state,
            files: self.generated_files.keys().cloned().collect(),
            phases: self.phases.clone(),
            total_files: self.generated_files.len(),
            completed_phases: self.completed_phase_count(),
            finalized: self.is_finalized(),
            sandbox: self.sandbox.clone(),
        }
    }

    /// Check invariants of a loaded state.
    pub fn validate(&self) -> CoreResult<()> {
        for (key, file) in &self.generated_files {
            let normalized = normalize_path(key)?;
            if &normalized != key || &file.path != key {
                return Err(CoreError::InvalidState(format!(
                    "file key '{}' does not match its normalized path",
                    key
                )));
            }
        }

        let open = self.phases.iter().filter(|p| !p.completed).count();
        if open > 1 {
            return Err(CoreError::InvalidState(format!("{} phases are open", open)));
        }
        if open == 1 && self.phases.last().map_or(true, |p| p.completed) {
            return Err(CoreError::InvalidState(
                "only the last phase may be open".to_string(),
            ));
        }

        // Planning and implementing work on an open phase; review closes it.
        let consistent = match self.current_state {
            DevState::Planning | DevState::Implementing => open == 1,
            DevState::Reviewing | DevState::Finalizing => open == 0 && !self.phases.is_empty(),
            DevState::Idle => open == 0,
        };
        if !consistent {
            return Err(CoreError::InvalidState(format!(
                "{} with {} phases ({} open)",
                self.current_state,
                self.phases.len(),
                open
            )));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> GenerationState {
        let blueprint = Blueprint::new("Todo", "todo", "minimal-js")
            .phase(PhaseConcept::new("Core", "Model").file("src/model.ts", "Model"));
        GenerationState::new("s1", "build a todo app", blueprint, GenerationMode::Deterministic)
    }

    #[test]
    fn test_new_state_is_idle() {
        let state = state();
        assert_eq!(state.current_state(), DevState::Idle);
        assert!(!state.has_started());
        assert!(state.current_phase().is_none());
    }

    #[test]
    fn test_rejected_transition_keeps_state() {
        let mut state = state();
        let err = state.apply(DevAction::ReviewAndFix).unwrap_err();

        assert!(err.is_state_error());
        assert_eq!(state.current_state(), DevState::Idle);
    }

    #[test]
    fn test_files_are_keyed_by_normalized_path() {
        let mut state = state();
        state.record_file(GeneratedFile::new("./src/x.ts", "a", "x")).unwrap();
        state.record_file(GeneratedFile::new("src\\x.ts", "b", "x")).unwrap();

        assert_eq!(state.file_count(), 1);
        assert_eq!(state.file("/src/x.ts").unwrap().content, "b");
        assert_eq!(state.file("src/x.ts").unwrap().path, "src/x.ts");
    }

    #[test]
    fn test_phase_completes_once() {
        let mut state = state();
        let concept = state.blueprint().implementation_roadmap[0].clone();
        state.start_phase(&concept).unwrap();
        state.record_file(GeneratedFile::new("src/model.ts", "export {}", "Model")).unwrap();

        assert_eq!(state.current_phase().unwrap().files, vec!["src/model.ts"]);
        state.complete_current_phase().unwrap();
        assert!(matches!(
            state.complete_current_phase(),
            Err(CoreError::PhaseAlreadyCompleted(_))
        ));
        assert_eq!(state.completed_phase_count(), 1);
    }

    #[test]
    fn test_cannot_open_two_phases() {
        let mut state = state();
        let concept = PhaseConcept::new("A", "");
        state.start_phase(&concept).unwrap();
        assert!(state.start_phase(&concept).is_err());
        assert_eq!(state.phases().len(), 1);
    }

    #[test]
    fn test_round_trip_and_validate() {
        let mut state = state();
        state.apply(DevAction::PlanNextPhase).unwrap();
        state.start_phase(&PhaseConcept::new("A", "")).unwrap();
        state.record_file(GeneratedFile::new("a.ts", "1", "a")).unwrap();

        let json = serde_json::to_string(&state).unwrap();
        let loaded: GenerationState = serde_json::from_str(&json).unwrap();

        loaded.validate().unwrap();
        assert_eq!(loaded.current_state(), DevState::Planning);
        assert_eq!(loaded.status().files, vec!["a.ts"]);
    }

    #[test]
    fn test_validate_rejects_unnormalized_keys() {
        let json = serde_json::json!({
            "sessionId": "s1",
            "query": "q",
            "blueprint": {"title": "t", "projectName": "p", "template": "minimal-js"},
            "generatedFiles": {"./a.ts": {"path": "./a.ts", "content": "", "purpose": ""}},
            "phases": [],
            "currentState": "IDLE",
            "mode": "deterministic",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z"
        });
        let state: GenerationState = serde_json::from_value(json).unwrap();
        assert!(state.validate().is_err());
    }

    fn loaded(current_state: &str, phases: serde_json::Value) -> GenerationState {
        serde_json::from_value(serde_json::json!({
            "sessionId": "s1",
            "query": "q",
            "blueprint": {"title": "t", "projectName": "p", "template": "minimal-js"},
            "generatedFiles": {},
            "phases": phases,
            "currentState": current_state,
            "mode": "deterministic",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn test_validate_checks_state_against_phases() {
        let open = serde_json::json!([{"name": "A", "description": "", "files": [], "completed": false}]);
        let done = serde_json::json!([{"name": "A", "description": "", "files": [], "completed": true}]);
        let none = serde_json::json!([]);

        assert!(loaded("IMPLEMENTING", none.clone()).validate().is_err());
        assert!(loaded("PLANNING", done.clone()).validate().is_err());
        assert!(loaded("REVIEWING", open.clone()).validate().is_err());
        assert!(loaded("FINALIZING", none.clone()).validate().is_err());
        assert!(loaded("IDLE", open.clone()).validate().is_err());

        assert!(loaded("IDLE", none).validate().is_ok());
        assert!(loaded("IMPLEMENTING", open).validate().is_ok());
        assert!(loaded("REVIEWING", done.clone()).validate().is_ok());
        assert!(loaded("IDLE", done).validate().is_ok());
    }
}
