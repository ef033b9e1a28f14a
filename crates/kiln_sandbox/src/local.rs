//! In-memory mock sandbox backend.
//!
//! Used when no real execution environment is available and throughout the
//! test suites. Instances and their files live in a backend-local store
//! whose lifetime is that of the service value (and its clones); nothing is
//! persisted.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{SandboxError, SandboxResult};
use crate::path::normalize_path;
use crate::service::SandboxService;
use crate::templates::TemplateCatalog;
use crate::types::{
    AnalysisSection, BootstrapInfo, ClearedErrors, CommandResult, CommandResults,
    CreateInstanceRequest, DeploymentResult, FileSet, FileWriteResult, InstanceDetails,
    InstanceHealth, InstanceList, InstanceLogs, InstanceStatus, RepositoryExport,
    RepositoryExportRequest, RepositoryPush, RepositoryPushRequest, RuntimeError, RuntimeErrors,
    SandboxFile, ShutdownAck, StaticAnalysis, TemplateDetails, WriteFilesOutcome,
};

/// Scripted outcome for the next executed command.
#[derive(Debug, Clone)]
pub struct MockCommandResponse {
    pub exit_code: i32,
    pub output: String,
}

impl MockCommandResponse {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }

    pub fn failure(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub method: String,
    pub run_id: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
struct MockInstance {
    template_name: String,
    project_name: String,
    created_at: DateTime<Utc>,
    preview_url: String,
    files: BTreeMap<String, String>,
    errors: Vec<RuntimeError>,
    logs: InstanceLogs,
    env_vars: HashMap<String, String>,
    webhook_url: Option<String>,
}

impl MockInstance {
    fn details(&self, run_id: &str) -> InstanceDetails {
        let uptime = (Utc::now() - self.created_at).num_seconds().max(0) as u64;
        InstanceDetails {
            run_id: run_id.to_string(),
            template_name: self.template_name.clone(),
            project_name: self.project_name.clone(),
            status: InstanceStatus::Running,
            start_time: self.created_at,
            uptime,
            directory: "/mock".to_string(),
            preview_url: self.preview_url.clone(),
        }
    }
}

/// In-memory sandbox backend.
///
/// Captures every call and returns scripted command responses, so tests can
/// verify orchestration behavior without a real execution environment.
#[derive(Clone)]
pub struct LocalSandboxService {
    session_id: String,
    catalog: Arc<TemplateCatalog>,
    instances: Arc<RwLock<HashMap<String, MockInstance>>>,
    /// Predefined responses for executed commands.
    responses: Arc<RwLock<Vec<MockCommandResponse>>>,
    /// Index of next response to return.
    response_index: Arc<AtomicUsize>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    /// Analysis result returned until replaced.
    analysis: Arc<RwLock<StaticAnalysis>>,
    /// Paths whose writes are rejected.
    rejected_paths: Arc<RwLock<Vec<String>>>,
}

impl Default for LocalSandboxService {
    fn default() -> Self {
        Self::new("local")
    }
}

impl LocalSandboxService {
    /// Create a new mock backend for a session.
    pub fn new(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        info!("LocalSandboxService initialized (mock mode) for session {}", session_id);
        Self {
            session_id,
            catalog: Arc::new(TemplateCatalog::builtin()),
            instances: Arc::new(RwLock::new(HashMap::new())),
            responses: Arc::new(RwLock::new(Vec::new())),
            response_index: Arc::new(AtomicUsize::new(0)),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
            analysis: Arc::new(RwLock::new(StaticAnalysis::default())),
            rejected_paths: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Use a custom template catalog.
    pub fn with_catalog(mut self, catalog: TemplateCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    /// Add a scripted response for the next executed command.
    pub fn add_response(self, response: MockCommandResponse) -> Self {
        self.responses.write().push(response);
        self
    }

    /// Replace all scripted command responses. Responses cycle once exhausted.
    pub fn with_responses(self, responses: Vec<MockCommandResponse>) -> Self {
        *self.responses.write() = responses;
        self.response_index.store(0, Ordering::SeqCst);
        self
    }

    /// Make writes to `path` fail.
    pub fn reject_path(self, path: impl Into<String>) -> Self {
        self.rejected_paths.write().push(path.into());
        self
    }

    /// Set the analysis result returned by `run_static_analysis`.
    pub fn set_static_analysis(&self, analysis: StaticAnalysis) {
        *self.analysis.write() = analysis;
    }

    /// Record a runtime error on an instance.
    pub fn push_runtime_error(&self, run_id: &str, error: RuntimeError) -> SandboxResult<()> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(run_id)
            .ok_or_else(|| SandboxError::not_found(run_id))?;
        instance.errors.push(error);
        Ok(())
    }

    /// The session this backend was created for.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Get calls to a specific method.
    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Check if a specific method was called.
    pub fn was_called(&self, method: &str) -> bool {
        self.captured_calls.read().iter().any(|c| c.method == method)
    }

    /// Clear all captured calls.
    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    fn record_call(&self, method: &str, run_id: Option<&str>, detail: Option<String>) {
        self.captured_calls.write().push(CapturedCall {
            method: method.to_string(),
            run_id: run_id.map(str::to_string),
            detail,
        });
    }

    fn next_response(&self, command: &str) -> MockCommandResponse {
        let responses = self.responses.read();
        if responses.is_empty() {
            return MockCommandResponse::success(format!("Mock output for {}", command));
        }
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        responses[index % responses.len()].clone()
    }

    fn with_instance<T>(
        &self,
        run_id: &str,
        f: impl FnOnce(&MockInstance) -> T,
    ) -> SandboxResult<T> {
        self.instances
            .read()
            .get(run_id)
            .map(f)
            .ok_or_else(|| SandboxError::not_found(run_id))
    }

    fn with_instance_mut<T>(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut MockInstance) -> T,
    ) -> SandboxResult<T> {
        self.instances
            .write()
            .get_mut(run_id)
            .map(f)
            .ok_or_else(|| SandboxError::not_found(run_id))
    }
}

#[async_trait]
impl SandboxService for LocalSandboxService {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn get_template_details(&self, template_name: &str) -> SandboxResult<TemplateDetails> {
        self.record_call("get_template_details", None, Some(template_name.to_string()));
        Ok(self.catalog.resolve(template_name))
    }

    async fn create_instance(&self, request: CreateInstanceRequest) -> SandboxResult<BootstrapInfo> {
        self.record_call("create_instance", None, Some(request.template_name.clone()));
        info!(
            "Mock create_instance: template={}, project={}",
            request.template_name, request.project_name
        );

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let run_id = format!("mock-{}-{}", request.template_name, &suffix[..12]);
        let preview_url = format!("https://{}.mock.preview", run_id);

        // Only known templates pre-seed files; the generic fallback is a
        // description, not content to copy.
        let files = self
            .catalog
            .get(&request.template_name)
            .map(|t| {
                t.files
                    .iter()
                    .map(|f| (f.path.clone(), f.content.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let instance = MockInstance {
            template_name: request.template_name,
            project_name: request.project_name,
            created_at: Utc::now(),
            preview_url: preview_url.clone(),
            files,
            errors: Vec::new(),
            logs: InstanceLogs::default(),
            env_vars: request.env_vars.unwrap_or_default(),
            webhook_url: request.webhook_url,
        };
        if let Some(webhook) = &instance.webhook_url {
            debug!("Instance {} will report to webhook {}", run_id, webhook);
        }
        debug!("Instance {} created with {} env vars", run_id, instance.env_vars.len());
        self.instances.write().insert(run_id.clone(), instance);

        Ok(BootstrapInfo {
            run_id,
            preview_url,
        })
    }

    async fn list_all_instances(&self) -> SandboxResult<InstanceList> {
        self.record_call("list_all_instances", None, None);
        let instances = self.instances.read();
        let mut list: Vec<InstanceDetails> = instances
            .iter()
            .map(|(run_id, instance)| instance.details(run_id))
            .collect();
        list.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.run_id.cmp(&b.run_id)));
        let count = list.len();
        Ok(InstanceList {
            instances: list,
            count,
        })
    }

    async fn get_instance_details(&self, run_id: &str) -> SandboxResult<InstanceDetails> {
        self.record_call("get_instance_details", Some(run_id), None);
        self.with_instance(run_id, |instance| instance.details(run_id))
    }

    async fn get_instance_status(&self, run_id: &str) -> SandboxResult<InstanceHealth> {
        self.record_call("get_instance_status", Some(run_id), None);
        self.with_instance(run_id, |instance| InstanceHealth {
            pending: false,
            is_healthy: true,
            message: "Mock instance running".to_string(),
            preview_url: instance.preview_url.clone(),
        })
    }

    async fn shutdown_instance(&self, run_id: &str) -> SandboxResult<ShutdownAck> {
        self.record_call("shutdown_instance", Some(run_id), None);
        let removed = self.instances.write().remove(run_id).is_some();
        if removed {
            info!("Mock instance {} shut down", run_id);
            Ok(ShutdownAck {
                message: "Mock instance shut down".to_string(),
                already_stopped: false,
            })
        } else {
            debug!("Shutdown requested for unknown instance {}", run_id);
            Ok(ShutdownAck {
                message: "Instance already shut down".to_string(),
                already_stopped: true,
            })
        }
    }

    async fn write_files(
        &self,
        run_id: &str,
        files: &[SandboxFile],
        commit_message: Option<&str>,
    ) -> SandboxResult<WriteFilesOutcome> {
        self.record_call(
            "write_files",
            Some(run_id),
            Some(files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>().join(",")),
        );
        let rejected = self.rejected_paths.read().clone();

        let results = self.with_instance_mut(run_id, |instance| {
            files
                .iter()
                .map(|file| match normalize_path(&file.path) {
                    Ok(path) if rejected.contains(&path) => {
                        FileWriteResult::failed(&file.path, "write rejected by sandbox")
                    }
                    Ok(path) => {
                        instance.files.insert(path, file.content.clone());
                        FileWriteResult::ok(&file.path)
                    }
                    Err(e) => FileWriteResult::failed(&file.path, e.to_string()),
                })
                .collect::<Vec<_>>()
        })?;

        if let Some(message) = commit_message {
            debug!("Mock commit on {}: {}", run_id, message);
        }
        Ok(WriteFilesOutcome::from_results(results))
    }

    async fn get_files(&self, run_id: &str, paths: Option<&[String]>) -> SandboxResult<FileSet> {
        self.record_call("get_files", Some(run_id), paths.map(|p| p.join(",")));
        self.with_instance(run_id, |instance| {
            let files = match paths {
                Some(paths) => paths
                    .iter()
                    .filter_map(|p| normalize_path(p).ok())
                    .filter_map(|p| {
                        instance
                            .files
                            .get(&p)
                            .map(|content| SandboxFile::new(p.clone(), content.clone()))
                    })
                    .collect(),
                None => instance
                    .files
                    .iter()
                    .map(|(path, content)| SandboxFile::new(path.clone(), content.clone()))
                    .collect(),
            };
            FileSet { files }
        })
    }

    async fn execute_commands(
        &self,
        run_id: &str,
        commands: &[String],
        timeout: Option<Duration>,
    ) -> SandboxResult<CommandResults> {
        self.record_call("execute_commands", Some(run_id), Some(commands.join(" && ")));
        debug!("Mock execute_commands: {:?} (timeout {:?})", commands, timeout);

        let results: Vec<CommandResult> = commands
            .iter()
            .map(|command| {
                let response = self.next_response(command);
                CommandResult {
                    command: command.clone(),
                    success: response.exit_code == 0,
                    output: response.output,
                    exit_code: response.exit_code,
                }
            })
            .collect();

        self.with_instance_mut(run_id, |instance| {
            for result in &results {
                let stream = if result.success {
                    &mut instance.logs.stdout
                } else {
                    &mut instance.logs.stderr
                };
                stream.push_str(&result.output);
                stream.push('\n');
            }
        })?;

        Ok(CommandResults { results })
    }

    async fn get_instance_errors(&self, run_id: &str) -> SandboxResult<RuntimeErrors> {
        self.record_call("get_instance_errors", Some(run_id), None);
        self.with_instance(run_id, |instance| RuntimeErrors::new(instance.errors.clone()))
    }

    async fn clear_instance_errors(&self, run_id: &str) -> SandboxResult<ClearedErrors> {
        self.record_call("clear_instance_errors", Some(run_id), None);
        self.with_instance_mut(run_id, |instance| {
            let cleared = instance.errors.len();
            instance.errors.clear();
            ClearedErrors { cleared }
        })
    }

    async fn run_static_analysis(
        &self,
        run_id: &str,
        files: Option<&[String]>,
    ) -> SandboxResult<StaticAnalysis> {
        self.record_call("run_static_analysis", Some(run_id), files.map(|f| f.join(",")));
        self.with_instance(run_id, |_| ())?;

        let analysis = self.analysis.read().clone();
        let Some(files) = files else {
            return Ok(analysis);
        };
        let keep = |section: AnalysisSection| {
            AnalysisSection::from_issues(
                section
                    .issues
                    .into_iter()
                    .filter(|issue| files.iter().any(|f| f == &issue.file_path))
                    .collect(),
            )
        };
        Ok(StaticAnalysis {
            lint: keep(analysis.lint),
            typecheck: keep(analysis.typecheck),
        })
    }

    async fn deploy(&self, run_id: &str) -> SandboxResult<DeploymentResult> {
        self.record_call("deploy", Some(run_id), None);
        self.with_instance(run_id, |_| DeploymentResult {
            message: "Mock deployment successful (did nothing)".to_string(),
            deployed_url: format!("https://{}.mock.deploy", run_id),
        })
    }

    async fn export_to_repository(
        &self,
        run_id: &str,
        request: &RepositoryExportRequest,
    ) -> SandboxResult<RepositoryExport> {
        self.record_call("export_to_repository", Some(run_id), Some(request.repository_name.clone()));
        self.with_instance(run_id, |_| RepositoryExport {
            repository_url: format!("https://github.com/mock/{}", request.repository_name),
        })
    }

    async fn push_to_repository(
        &self,
        run_id: &str,
        request: &RepositoryPushRequest,
    ) -> SandboxResult<RepositoryPush> {
        self.record_call("push_to_repository", Some(run_id), Some(request.branch.clone()));
        self.with_instance(run_id, |_| RepositoryPush {
            repository_url: request.repository_url.clone(),
            commit_sha: None,
        })
    }

    async fn get_logs(&self, run_id: &str) -> SandboxResult<InstanceLogs> {
        self.record_call("get_logs", Some(run_id), None);
        self.with_instance(run_id, |instance| instance.logs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CodeIssue;

    async fn create(service: &LocalSandboxService) -> String {
        service
            .create_instance(CreateInstanceRequest::new("minimal-js", "proj1"))
            .await
            .unwrap()
            .run_id
    }

    #[tokio::test]
    async fn test_create_seeds_template_files() {
        let service = LocalSandboxService::new("test");
        let run_id = create(&service).await;

        let files = service.get_files(&run_id, None).await.unwrap();
        assert_eq!(files.files.len(), 5);
        assert!(files.get("public/index.html").unwrap().contains("Minimal JS Template"));
    }

    #[tokio::test]
    async fn test_instances_have_separate_files() {
        let service = LocalSandboxService::new("test");
        let first = create(&service).await;
        let second = create(&service).await;
        assert_ne!(first, second);

        service
            .write_files(&first, &[SandboxFile::new("only-first.txt", "1")], None)
            .await
            .unwrap();

        let paths = vec!["only-first.txt".to_string()];
        let in_second = service.get_files(&second, Some(&paths)).await.unwrap();
        assert!(in_second.files.is_empty());
    }

    #[tokio::test]
    async fn test_partial_write_failure_is_reported() {
        let service = LocalSandboxService::new("test").reject_path("locked.txt");
        let run_id = create(&service).await;

        let outcome = service
            .write_files(
                &run_id,
                &[
                    SandboxFile::new("ok.txt", "fine"),
                    SandboxFile::new("locked.txt", "nope"),
                    SandboxFile::new("../escape.txt", "nope"),
                ],
                Some("partial"),
            )
            .await
            .unwrap();

        assert!(!outcome.all_succeeded());
        assert_eq!(outcome.failed().len(), 2);
        assert!(outcome.results[0].success);

        let files = service.get_files(&run_id, None).await.unwrap();
        assert_eq!(files.get("ok.txt"), Some("fine"));
        assert_eq!(files.get("locked.txt"), None);
    }

    #[tokio::test]
    async fn test_scripted_command_responses() {
        let service = LocalSandboxService::new("test").with_responses(vec![
            MockCommandResponse::failure(1, "install failed"),
            MockCommandResponse::success("built"),
        ]);
        let run_id = create(&service).await;

        let results = service
            .execute_commands(
                &run_id,
                &["bun install".to_string(), "bun run build".to_string()],
                None,
            )
            .await
            .unwrap();

        assert_eq!(results.results.len(), 2);
        assert!(!results.results[0].success);
        assert_eq!(results.results[0].exit_code, 1);
        assert!(results.results[1].success);
        assert_eq!(results.results[1].command, "bun run build");

        let logs = service.get_logs(&run_id).await.unwrap();
        assert!(logs.stderr.contains("install failed"));
        assert!(logs.stdout.contains("built"));
    }

    #[tokio::test]
    async fn test_runtime_errors_accumulate_and_clear() {
        let service = LocalSandboxService::new("test");
        let run_id = create(&service).await;

        service
            .push_runtime_error(&run_id, RuntimeError::new("ReferenceError: x is not defined"))
            .unwrap();
        let errors = service.get_instance_errors(&run_id).await.unwrap();
        assert!(errors.has_errors);
        assert_eq!(errors.errors.len(), 1);

        assert_eq!(service.clear_instance_errors(&run_id).await.unwrap().cleared, 1);
        assert_eq!(service.clear_instance_errors(&run_id).await.unwrap().cleared, 0);
        assert!(!service.get_instance_errors(&run_id).await.unwrap().has_errors);
    }

    #[tokio::test]
    async fn test_static_analysis_file_filter() {
        let service = LocalSandboxService::new("test");
        let run_id = create(&service).await;
        service.set_static_analysis(StaticAnalysis {
            lint: AnalysisSection::from_issues(vec![
                CodeIssue::error("src/a.ts", 1, "unused variable"),
                CodeIssue::warning("src/b.ts", 4, "prefer const"),
            ]),
            typecheck: AnalysisSection::default(),
        });

        let all = service.run_static_analysis(&run_id, None).await.unwrap();
        assert_eq!(all.lint.issues.len(), 2);

        let subset = vec!["src/b.ts".to_string()];
        let filtered = service.run_static_analysis(&run_id, Some(&subset)).await.unwrap();
        assert_eq!(filtered.lint.issues.len(), 1);
        assert_eq!(filtered.lint.summary.warning_count, 1);
        assert_eq!(filtered.lint.summary.error_count, 0);
    }

    #[tokio::test]
    async fn test_captures_calls() {
        let service = LocalSandboxService::new("test");
        let run_id = create(&service).await;
        let _ = service.deploy(&run_id).await;

        assert!(service.was_called("create_instance"));
        assert_eq!(service.get_method_calls("deploy").len(), 1);
        assert_eq!(
            service.get_method_calls("deploy")[0].run_id.as_deref(),
            Some(run_id.as_str())
        );

        service.clear_calls();
        assert!(service.get_calls().is_empty());
    }
}
