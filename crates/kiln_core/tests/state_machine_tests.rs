//! Integration tests for the generation state and phase state machine.

use kiln_core::{
    Blueprint, DevAction, DevState, GeneratedFile, GenerationMode, GenerationState, PhaseConcept,
    SandboxBinding, StateStore,
};
use tempfile::TempDir;

fn blueprint() -> Blueprint {
    Blueprint::new("Notes", "notes", "minimal-js")
        .phase(PhaseConcept::new("Core", "Storage").file("src/store.ts", "Note storage"))
        .phase(PhaseConcept::new("UI", "Views").file("public/app.js", "Views"))
}

/// Walk a full two-phase session through the state machine.
#[test]
fn test_full_session_walk() {
    let mut state = GenerationState::new("s1", "notes app", blueprint(), GenerationMode::Deterministic);
    let roadmap = state.blueprint().implementation_roadmap.clone();

    for concept in &roadmap {
        assert_eq!(state.apply(DevAction::PlanNextPhase).unwrap(), DevState::Planning);
        state.start_phase(concept).unwrap();
        assert_eq!(
            state.apply(DevAction::ImplementCurrentPhase).unwrap(),
            DevState::Implementing
        );
        for file in &concept.files {
            state
                .record_file(GeneratedFile::new(&file.path, "// generated", &file.purpose))
                .unwrap();
        }
        assert_eq!(state.apply(DevAction::ReviewAndFix).unwrap(), DevState::Reviewing);
        state.complete_current_phase().unwrap();
    }

    assert_eq!(state.apply(DevAction::Finalize).unwrap(), DevState::Finalizing);
    assert!(!state.is_finalized());
    assert_eq!(state.apply(DevAction::Finalize).unwrap(), DevState::Idle);
    assert!(state.is_finalized());

    let status = state.status();
    assert_eq!(status.current_state, DevState::Idle);
    assert_eq!(status.completed_phases, 2);
    assert_eq!(status.files, vec!["public/app.js", "src/store.ts"]);
    assert!(state.validate().is_ok());
}

/// Illegal actions leave the state untouched.
#[test]
fn test_illegal_actions_do_not_mutate() {
    let mut state = GenerationState::new("s1", "q", blueprint(), GenerationMode::Directed);
    state.apply(DevAction::PlanNextPhase).unwrap();

    for action in [DevAction::PlanNextPhase, DevAction::ReviewAndFix, DevAction::Finalize] {
        assert!(state.apply(action).is_err());
        assert_eq!(state.current_state(), DevState::Planning);
    }
}

/// A persisted session reloads with its sandbox binding.
#[test]
fn test_persisted_session_reloads() {
    let temp = TempDir::new().unwrap();
    let store = StateStore::new(temp.path());

    let mut state = GenerationState::new("s2", "q", blueprint(), GenerationMode::Deterministic);
    state.bind_sandbox(SandboxBinding {
        run_id: "mock-minimal-js-1".to_string(),
        preview_url: "https://mock-minimal-js-1.mock.preview".to_string(),
        template: "minimal-js".to_string(),
    });
    store.save(&state).unwrap();

    let path = store.state_path("s2");
    let loaded = StateStore::load_file(&path).unwrap();
    assert_eq!(loaded.sandbox().unwrap().run_id, "mock-minimal-js-1");
    assert_eq!(loaded.query(), "q");
}
