//! # kiln_core
//!
//! Generation state and phase state machine for Kiln.
//!
//! # Architecture
//!
//! - **State machine**: `IDLE → PLANNING → IMPLEMENTING → REVIEWING →
//!   FINALIZING → IDLE`, with review looping back to planning per phase
//! - **Generation state**: blueprint, generated files and phase records of
//!   one session
//! - **Guard**: at most one generation loop per session
//! - **Events**: progress broadcast to subscribers
//! - **Persistence**: JSON snapshots and a JSONL event log per session

pub mod blueprint;
pub mod error;
pub mod events;
pub mod generation;
pub mod guard;
pub mod persistence;
pub mod state;

pub use blueprint::{Blueprint, FileConcept, PhaseConcept};
pub use error::{CoreError, CoreResult};
pub use events::{
    BroadcastChannel, EventEmitter, EventRecord, EventSink, FanoutSink, GenerationEvent, RecordingSink,
};
pub use generation::{
    GeneratedFile, GenerationMode, GenerationState, PhaseRecord, ProjectStatus, SandboxBinding,
};
pub use guard::{GenerationGuard, GuardToken};
pub use persistence::{EventLogSink, StateStore};
pub use state::{transition, DevAction, DevState};
