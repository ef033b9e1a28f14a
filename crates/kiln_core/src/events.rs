//! Progress events and broadcast sinks.
//!
//! Events are delivered best-effort in emission order. A sink with no
//! listeners silently drops them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::state::DevState;

/// A progress event emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    GenerationStarted {
        #[serde(rename = "totalFiles")]
        total_files: usize,
    },
    StateChanged {
        from: DevState,
        to: DevState,
    },
    PhasePlanned {
        phase: String,
        files: Vec<String>,
    },
    PhaseImplementing {
        phase: String,
    },
    FileGenerated {
        path: String,
        purpose: String,
    },
    PhaseImplemented {
        phase: String,
        files: usize,
    },
    ReviewCompleted {
        phase: String,
        cycles: u32,
        #[serde(rename = "remainingIssues")]
        remaining_issues: usize,
    },
    ConversationReply {
        turn: u32,
        message: String,
    },
    DeploymentCompleted {
        url: String,
    },
    GenerationComplete {
        #[serde(rename = "totalFiles")]
        total_files: usize,
        phases: usize,
    },
    Degraded {
        reason: String,
    },
    Error {
        error: String,
    },
}

impl GenerationEvent {
    /// The `type` tag of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GenerationStarted { .. } => "generation_started",
            Self::StateChanged { .. } => "state_changed",
            Self::PhasePlanned { .. } => "phase_planned",
            Self::PhaseImplementing { .. } => "phase_implementing",
            Self::FileGenerated { .. } => "file_generated",
            Self::PhaseImplemented { .. } => "phase_implemented",
            Self::ReviewCompleted { .. } => "review_completed",
            Self::ConversationReply { .. } => "conversation_reply",
            Self::DeploymentCompleted { .. } => "deployment_completed",
            Self::GenerationComplete { .. } => "generation_complete",
            Self::Degraded { .. } => "degraded",
            Self::Error { .. } => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// An event stamped with its session and emission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: GenerationEvent,
}

impl EventRecord {
    pub fn new(session_id: impl Into<String>, event: GenerationEvent) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Destination for progress events.
pub trait EventSink: Send + Sync {
    fn emit(&self, record: EventRecord);
}

/// Stamps events with a session id before handing them to a sink.
#[derive(Clone)]
pub struct EventEmitter {
    session_id: String,
    sink: Arc<dyn EventSink>,
}

impl EventEmitter {
    pub fn new(session_id: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            session_id: session_id.into(),
            sink,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn emit(&self, event: GenerationEvent) {
        trace!("{} event: {}", self.session_id, event.kind());
        self.sink.emit(EventRecord::new(self.session_id.clone(), event));
    }
}

/// Fan-out to any number of subscribers over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastChannel {
    tx: broadcast::Sender<EventRecord>,
}

impl BroadcastChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastChannel {
    fn emit(&self, record: EventRecord) {
        if self.tx.send(record).is_err() {
            trace!("No event subscribers");
        }
    }
}

/// Keeps every event in memory. Used by tests and the CLI summary.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    pub fn events(&self) -> Vec<GenerationEvent> {
        self.records.lock().iter().map(|r| r.event.clone()).collect()
    }

    /// Event type tags in emission order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.records.lock().iter().map(|r| r.event.kind()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.event.kind() == kind)
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, record: EventRecord) {
        self.records.lock().push(record);
    }
}

/// Sends every event to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, record: EventRecord) {
        for sink in &self.sinks {
            sink.emit(record.clone());
        }
    }
}
