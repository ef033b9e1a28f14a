//! Sandbox service trait.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SandboxResult;
use crate::types::{
    BootstrapInfo, ClearedErrors, CommandResults, CreateInstanceRequest, DeploymentResult,
    FileSet, InstanceDetails, InstanceHealth, InstanceList, InstanceLogs, RepositoryExport,
    RepositoryExportRequest, RepositoryPush, RepositoryPushRequest, RuntimeErrors, SandboxFile,
    ShutdownAck, StaticAnalysis, TemplateDetails, WriteFilesOutcome,
};

/// Uniform contract for an ephemeral execution environment.
///
/// Every backend (in-memory mock, local workspace, remote runner) implements
/// this trait so the orchestrator can treat them identically. Expected
/// failures such as an unknown instance come back as `Err` values; no
/// operation panics on them.
#[async_trait]
pub trait SandboxService: Send + Sync {
    /// Short backend identifier used in logs.
    fn backend_name(&self) -> &'static str;

    /// Get the file tree, files and dependency manifest of a template.
    ///
    /// Unknown templates resolve to a generic empty-project fallback.
    async fn get_template_details(&self, template_name: &str) -> SandboxResult<TemplateDetails>;

    /// Create a new instance, pre-seeded with the template's files.
    async fn create_instance(&self, request: CreateInstanceRequest) -> SandboxResult<BootstrapInfo>;

    /// Snapshot of all live instances.
    async fn list_all_instances(&self) -> SandboxResult<InstanceList>;

    /// Metadata of one instance; fails with `InstanceNotFound` when unknown.
    async fn get_instance_details(&self, run_id: &str) -> SandboxResult<InstanceDetails>;

    /// Health of one instance; fails with `InstanceNotFound` when unknown.
    async fn get_instance_status(&self, run_id: &str) -> SandboxResult<InstanceHealth>;

    /// Remove an instance. Idempotent.
    async fn shutdown_instance(&self, run_id: &str) -> SandboxResult<ShutdownAck>;

    /// Write files, fully replacing previous content at each path.
    ///
    /// Per-file failures are reported in the outcome rather than aborting
    /// the batch.
    async fn write_files(
        &self,
        run_id: &str,
        files: &[SandboxFile],
        commit_message: Option<&str>,
    ) -> SandboxResult<WriteFilesOutcome>;

    /// Read the requested files, or every tracked file when `paths` is
    /// `None`. Missing paths are omitted.
    async fn get_files(&self, run_id: &str, paths: Option<&[String]>) -> SandboxResult<FileSet>;

    /// Run commands in order. A failing command does not cancel later ones.
    async fn execute_commands(
        &self,
        run_id: &str,
        commands: &[String],
        timeout: Option<Duration>,
    ) -> SandboxResult<CommandResults>;

    /// Runtime errors accumulated since the last clear.
    async fn get_instance_errors(&self, run_id: &str) -> SandboxResult<RuntimeErrors>;

    /// Clear accumulated runtime errors. Idempotent.
    async fn clear_instance_errors(&self, run_id: &str) -> SandboxResult<ClearedErrors>;

    /// Lint and type-check the instance, optionally restricted to `files`.
    async fn run_static_analysis(
        &self,
        run_id: &str,
        files: Option<&[String]>,
    ) -> SandboxResult<StaticAnalysis>;

    /// Publish the current file set to a public URL.
    async fn deploy(&self, run_id: &str) -> SandboxResult<DeploymentResult>;

    /// Create a new external repository from the instance.
    async fn export_to_repository(
        &self,
        run_id: &str,
        request: &RepositoryExportRequest,
    ) -> SandboxResult<RepositoryExport>;

    /// Push the instance to an existing external repository.
    async fn push_to_repository(
        &self,
        run_id: &str,
        request: &RepositoryPushRequest,
    ) -> SandboxResult<RepositoryPush>;

    /// Captured stdout/stderr of the instance.
    async fn get_logs(&self, run_id: &str) -> SandboxResult<InstanceLogs>;
}
