//! # kiln_sandbox
//!
//! Sandbox service contract and backends for Kiln.
//!
//! A sandbox is an ephemeral, isolated environment holding one generated
//! project: its files, a way to run commands against them, static analysis,
//! and publishing. The orchestrator only sees the [`SandboxService`] trait.
//!
//! # Backends
//!
//! - **Local**: in-memory mock with scripted command responses and call
//!   capture, for tests and offline runs
//! - **Workspace**: directories on disk, commands via `sh -c`
//! - **Remote**: HTTP client for a sandbox runner service
//!
//! # Example
//!
//! ```rust,no_run
//! use kiln_sandbox::{CreateInstanceRequest, LocalSandboxService, SandboxFile, SandboxService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sandbox = LocalSandboxService::new("session-1");
//!     let info = sandbox
//!         .create_instance(CreateInstanceRequest::new("minimal-js", "demo"))
//!         .await?;
//!
//!     sandbox
//!         .write_files(&info.run_id, &[SandboxFile::new("src/x.ts", "export const x=1;")], None)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod factory;
pub mod local;
pub mod path;
pub mod remote;
pub mod service;
pub mod templates;
pub mod types;
pub mod workspace;

pub use config::{SandboxBackend, SandboxConfig};
pub use error::{SandboxError, SandboxResult};
pub use factory::create_sandbox_service;
pub use local::{CapturedCall, LocalSandboxService, MockCommandResponse};
pub use path::normalize_path;
pub use remote::RemoteSandboxService;
pub use service::SandboxService;
pub use templates::{TemplateCatalog, MINIMAL_JS};
pub use types::*;
pub use workspace::{parse_diagnostics, WorkspaceSandboxService};
