//! Session persistence.
//!
//! Layout under the store root:
//!
//! ```text
//! .kiln/sessions/<session_id>/state.json
//! .kiln/sessions/<session_id>/events.jsonl
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::CoreResult;
use crate::events::{EventRecord, EventSink};
use crate::generation::GenerationState;

const STATE_FILE: &str = "state.json";
const EVENTS_FILE: &str = "events.jsonl";

/// Saves and loads generation sessions on disk.
#[derive(Debug, Clone)]
pub struct StateStore {
    sessions_dir: PathBuf,
}

impl StateStore {
    /// Create a store rooted at a project directory.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            sessions_dir: root.as_ref().join(".kiln").join("sessions"),
        }
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(session_id)
    }

    pub fn state_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(STATE_FILE)
    }

    pub fn events_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(EVENTS_FILE)
    }

    /// Save the state, replacing any previous snapshot.
    pub fn save(&self, state: &GenerationState) -> CoreResult<PathBuf> {
        let path = self.state_path(state.session_id());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        debug!("Saved generation state to {:?}", path);
        Ok(path)
    }

    /// Load and validate a session's state.
    pub fn load(&self, session_id: &str) -> CoreResult<GenerationState> {
        Self::load_file(&self.state_path(session_id))
    }

    /// Load and validate a state file at an arbitrary path.
    pub fn load_file(path: &Path) -> CoreResult<GenerationState> {
        let content = fs::read_to_string(path)?;
        let state: GenerationState = serde_json::from_str(&content)?;
        state.validate()?;
        Ok(state)
    }

    /// Append one event to the session's event log.
    pub fn append_event(&self, record: &EventRecord) -> CoreResult<()> {
        let path = self.events_path(&record.session_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Read a session's event log. Malformed lines are skipped.
    pub fn load_events(&self, session_id: &str) -> CoreResult<Vec<EventRecord>> {
        let path = self.events_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping malformed event in {:?}: {}", path, e);
                    None
                }
            })
            .collect())
    }

    /// List saved session ids, sorted.
    pub fn list_sessions(&self) -> CoreResult<Vec<String>> {
        if !self.sessions_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.sessions_dir)? {
            let entry = entry?;
            if entry.path().join(STATE_FILE).exists() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Event sink that appends to a [`StateStore`] event log.
#[derive(Debug, Clone)]
pub struct EventLogSink {
    store: StateStore,
}

impl EventLogSink {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl EventSink for EventLogSink {
    fn emit(&self, record: EventRecord) {
        if let Err(e) = self.store.append_event(&record) {
            warn!("Failed to persist event {}: {}", record.event.kind(), e);
        }
    }
}
