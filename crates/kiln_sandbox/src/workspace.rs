//! Filesystem and process backed sandbox.
//!
//! Each instance is a directory under the workspace root. Files are written
//! to disk and commands run through `sh -c` inside the instance directory.
//! Static analysis runs the configured lint and type-check commands and
//! parses their diagnostics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::path::normalize_path;
use crate::service::SandboxService;
use crate::templates::TemplateCatalog;
use crate::types::{
    AnalysisSection, BootstrapInfo, ClearedErrors, CodeIssue, CommandResult, CommandResults,
    CreateInstanceRequest, DeploymentResult, FileSet, FileWriteResult, InstanceDetails,
    InstanceHealth, InstanceList, InstanceLogs, InstanceStatus, RepositoryExport,
    RepositoryExportRequest, RepositoryPush, RepositoryPushRequest, RuntimeError, RuntimeErrors,
    SandboxFile, Severity, ShutdownAck, StaticAnalysis, TemplateDetails, WriteFilesOutcome,
};

/// Exit code reported for commands killed by a timeout.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported for commands that could not be started.
const SPAWN_FAILED_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone)]
struct WorkspaceInstance {
    template_name: String,
    project_name: String,
    directory: PathBuf,
    created_at: DateTime<Utc>,
    env_vars: HashMap<String, String>,
    errors: Vec<RuntimeError>,
    logs: InstanceLogs,
}

/// Sandbox backend running on the local machine.
pub struct WorkspaceSandboxService {
    root: PathBuf,
    catalog: TemplateCatalog,
    lint_command: Option<String>,
    typecheck_command: Option<String>,
    default_timeout: Option<Duration>,
    instances: RwLock<HashMap<String, WorkspaceInstance>>,
}

impl WorkspaceSandboxService {
    /// Create a backend rooted at `root` with the built-in templates.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            catalog: TemplateCatalog::builtin(),
            lint_command: None,
            typecheck_command: None,
            default_timeout: None,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Create a backend from configuration, loading extra templates if set.
    pub fn from_config(config: &SandboxConfig) -> SandboxResult<Self> {
        let mut catalog = TemplateCatalog::builtin();
        if let Some(dir) = &config.templates_dir {
            catalog.load_dir(dir)?;
        }
        std::fs::create_dir_all(&config.workspace_root)?;
        info!("Workspace sandbox rooted at {:?}", config.workspace_root);

        Ok(Self {
            root: config.workspace_root.clone(),
            catalog,
            lint_command: config.lint_command.clone(),
            typecheck_command: config.typecheck_command.clone(),
            default_timeout: config.command_timeout(),
            instances: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_catalog(mut self, catalog: TemplateCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_lint_command(mut self, command: impl Into<String>) -> Self {
        self.lint_command = Some(command.into());
        self
    }

    pub fn with_typecheck_command(mut self, command: impl Into<String>) -> Self {
        self.typecheck_command = Some(command.into());
        self
    }

    /// Directory of an instance.
    pub fn instance_dir(&self, run_id: &str) -> SandboxResult<PathBuf> {
        self.instances
            .read()
            .get(run_id)
            .map(|i| i.directory.clone())
            .ok_or_else(|| SandboxError::not_found(run_id))
    }

    fn instance(&self, run_id: &str) -> SandboxResult<WorkspaceInstance> {
        self.instances
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| SandboxError::not_found(run_id))
    }

    fn preview_url(&self, directory: &Path) -> String {
        format!("file://{}", directory.display())
    }

    fn details(&self, run_id: &str, instance: &WorkspaceInstance) -> InstanceDetails {
        InstanceDetails {
            run_id: run_id.to_string(),
            template_name: instance.template_name.clone(),
            project_name: instance.project_name.clone(),
            status: InstanceStatus::Running,
            start_time: instance.created_at,
            uptime: (Utc::now() - instance.created_at).num_seconds().max(0) as u64,
            directory: instance.directory.display().to_string(),
            preview_url: self.preview_url(&instance.directory),
        }
    }

    async fn run_shell(
        &self,
        directory: &Path,
        env_vars: &HashMap<String, String>,
        command: &str,
        timeout: Option<Duration>,
    ) -> SandboxResult<CommandResult> {
        debug!("Executing in {:?}: {}", directory, command);
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(directory)
            .envs(env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::ExecutionFailed(format!("Failed to spawn sh: {}", e)))?;

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    warn!("Command timed out after {:?}: {}", limit, command);
                    return Ok(CommandResult {
                        command: command.to_string(),
                        success: false,
                        output: SandboxError::Timeout(limit.as_secs()).to_string(),
                        exit_code: TIMEOUT_EXIT_CODE,
                    });
                }
            },
            None => child.wait_with_output().await?,
        };

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        Ok(CommandResult {
            command: command.to_string(),
            success: output.status.success(),
            output: text,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn analysis_pass(
        &self,
        instance: &WorkspaceInstance,
        command: Option<&str>,
        files: Option<&[String]>,
    ) -> SandboxResult<AnalysisSection> {
        let Some(command) = command else {
            return Ok(AnalysisSection::default());
        };
        let result = self
            .run_shell(&instance.directory, &instance.env_vars, command, self.default_timeout)
            .await?;
        let issues = parse_diagnostics(&result.output)
            .into_iter()
            .filter(|issue| files.map_or(true, |f| f.iter().any(|p| p == &issue.file_path)))
            .collect();
        Ok(AnalysisSection::from_issues(issues))
    }
}

/// Directory-safe form of a template name: ASCII alphanumerics and `-`.
fn run_id_prefix(template_name: &str) -> String {
    let slug: String = template_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "instance".to_string()
    } else {
        slug
    }
}

static DIAGNOSTIC_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

/// Unix `path:line:col: severity: message` and tsc `path(line,col): severity CODE: message`.
const DIAGNOSTIC_SOURCES: [&str; 2] = [
    r"^(?P<path>[^:\s()][^:()]*):(?P<line>\d+):(?P<col>\d+):\s*(?P<sev>[A-Za-z]+)\s*:?\s*(?P<msg>.*)$",
    r"^(?P<path>[^()\s][^()]*)\((?P<line>\d+),(?P<col>\d+)\):\s*(?P<sev>[A-Za-z]+)\s+(?P<rule>[A-Z]+\d+):\s*(?P<msg>.*)$",
];

fn diagnostic_patterns() -> &'static [Regex] {
    DIAGNOSTIC_PATTERNS.get_or_init(|| {
        DIAGNOSTIC_SOURCES
            .iter()
            .filter_map(|source| match Regex::new(source) {
                Ok(re) => Some(re),
                Err(e) => {
                    error!("Invalid diagnostic pattern {}: {}", source, e);
                    None
                }
            })
            .collect()
    })
}

/// Parse compiler and linter diagnostics into issues.
///
/// Recognizes `path:line:col: severity: message` (gcc, eslint unix
/// formatter, ruff) and `path(line,col): severity CODE: message` (tsc).
/// Lines in neither form are ignored.
pub fn parse_diagnostics(output: &str) -> Vec<CodeIssue> {
    let mut issues = Vec::new();
    for line in output.lines().map(str::trim) {
        for re in diagnostic_patterns() {
            let Some(caps) = re.captures(line) else {
                continue;
            };
            let Some(severity) = Severity::parse(&caps["sev"]) else {
                continue;
            };
            let Ok(file_path) = normalize_path(&caps["path"]) else {
                continue;
            };
            issues.push(CodeIssue {
                file_path,
                line: caps["line"].parse().unwrap_or(0),
                column: caps["col"].parse().unwrap_or(0),
                severity,
                message: caps["msg"].trim().to_string(),
                rule_id: caps.name("rule").map(|m| m.as_str().to_string()),
            });
            break;
        }
    }
    issues
}

#[async_trait]
impl SandboxService for WorkspaceSandboxService {
    fn backend_name(&self) -> &'static str {
        "workspace"
    }

    async fn get_template_details(&self, template_name: &str) -> SandboxResult<TemplateDetails> {
        Ok(self.catalog.resolve(template_name))
    }

    async fn create_instance(&self, request: CreateInstanceRequest) -> SandboxResult<BootstrapInfo> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let run_id = format!("{}-{}", run_id_prefix(&request.template_name), &suffix[..12]);
        let directory = self.root.join(&run_id);
        tokio::fs::create_dir_all(&directory).await?;

        let seeded = self
            .catalog
            .get(&request.template_name)
            .map(|t| t.files.clone())
            .unwrap_or_default();
        for file in &seeded {
            let target = directory.join(&file.path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, &file.content).await?;
        }
        info!(
            "Created workspace instance {} from template {} ({} files)",
            run_id,
            request.template_name,
            seeded.len()
        );

        let preview_url = self.preview_url(&directory);
        self.instances.write().insert(
            run_id.clone(),
            WorkspaceInstance {
                template_name: request.template_name,
                project_name: request.project_name,
                directory,
                created_at: Utc::now(),
                env_vars: request.env_vars.unwrap_or_default(),
                errors: Vec::new(),
                logs: InstanceLogs::default(),
            },
        );

        Ok(BootstrapInfo {
            run_id,
            preview_url,
        })
    }

    async fn list_all_instances(&self) -> SandboxResult<InstanceList> {
        let instances = self.instances.read();
        let mut list: Vec<InstanceDetails> = instances
            .iter()
            .map(|(run_id, instance)| self.details(run_id, instance))
            .collect();
        list.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.run_id.cmp(&b.run_id)));
        let count = list.len();
        Ok(InstanceList {
            instances: list,
            count,
        })
    }

    async fn get_instance_details(&self, run_id: &str) -> SandboxResult<InstanceDetails> {
        let instance = self.instance(run_id)?;
        Ok(self.details(run_id, &instance))
    }

    async fn get_instance_status(&self, run_id: &str) -> SandboxResult<InstanceHealth> {
        let instance = self.instance(run_id)?;
        let healthy = instance.directory.is_dir();
        Ok(InstanceHealth {
            pending: false,
            is_healthy: healthy,
            message: if healthy {
                "Workspace instance ready".to_string()
            } else {
                "Workspace directory is missing".to_string()
            },
            preview_url: self.preview_url(&instance.directory),
        })
    }

    async fn shutdown_instance(&self, run_id: &str) -> SandboxResult<ShutdownAck> {
        let removed = self.instances.write().remove(run_id);
        match removed {
            Some(instance) => {
                if let Err(e) = tokio::fs::remove_dir_all(&instance.directory).await {
                    warn!("Failed to remove {:?}: {}", instance.directory, e);
                }
                info!("Workspace instance {} shut down", run_id);
                Ok(ShutdownAck {
                    message: "Instance shut down".to_string(),
                    already_stopped: false,
                })
            }
            None => Ok(ShutdownAck {
                message: "Instance already shut down".to_string(),
                already_stopped: true,
            }),
        }
    }

    async fn write_files(
        &self,
        run_id: &str,
        files: &[SandboxFile],
        commit_message: Option<&str>,
    ) -> SandboxResult<WriteFilesOutcome> {
        let directory = self.instance_dir(run_id)?;

        let mut results = Vec::with_capacity(files.len());
        for file in files {
            let path = match normalize_path(&file.path) {
                Ok(path) => path,
                Err(e) => {
                    results.push(FileWriteResult::failed(&file.path, e.to_string()));
                    continue;
                }
            };
            let target = directory.join(&path);
            let written = async {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&target, &file.content).await
            }
            .await;
            results.push(match written {
                Ok(()) => FileWriteResult::ok(&file.path),
                Err(e) => FileWriteResult::failed(&file.path, e.to_string()),
            });
        }

        if let Some(message) = commit_message {
            debug!("Workspace write on {}: {}", run_id, message);
        }
        Ok(WriteFilesOutcome::from_results(results))
    }

    async fn get_files(&self, run_id: &str, paths: Option<&[String]>) -> SandboxResult<FileSet> {
        let directory = self.instance_dir(run_id)?;

        let files = match paths {
            Some(paths) => {
                let mut files = Vec::new();
                for path in paths {
                    let Ok(path) = normalize_path(path) else {
                        continue;
                    };
                    if let Ok(content) = tokio::fs::read_to_string(directory.join(&path)).await {
                        files.push(SandboxFile::new(path, content));
                    }
                }
                files
            }
            None => WalkDir::new(&directory)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    let name = e.file_name().to_string_lossy();
                    name != "node_modules" && name != ".git"
                })
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| {
                    let relative = e.path().strip_prefix(&directory).ok()?;
                    let path = normalize_path(&relative.to_string_lossy()).ok()?;
                    let content = std::fs::read_to_string(e.path()).ok()?;
                    Some(SandboxFile::new(path, content))
                })
                .collect(),
        };

        Ok(FileSet { files })
    }

    async fn execute_commands(
        &self,
        run_id: &str,
        commands: &[String],
        timeout: Option<Duration>,
    ) -> SandboxResult<CommandResults> {
        let instance = self.instance(run_id)?;
        let timeout = timeout.or(self.default_timeout);

        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            let result = match self
                .run_shell(&instance.directory, &instance.env_vars, command, timeout)
                .await
            {
                Ok(result) => result,
                Err(e) => CommandResult {
                    command: command.clone(),
                    success: false,
                    output: e.to_string(),
                    exit_code: SPAWN_FAILED_EXIT_CODE,
                },
            };
            if !result.success {
                warn!("Command failed ({}): {}", result.exit_code, command);
            }
            results.push(result);
        }

        // Command output goes to the logs; runtime errors are only what the app reports.
        if let Some(instance) = self.instances.write().get_mut(run_id) {
            for result in &results {
                let stream = if result.success {
                    &mut instance.logs.stdout
                } else {
                    &mut instance.logs.stderr
                };
                stream.push_str(&result.output);
                if !result.output.ends_with('\n') {
                    stream.push('\n');
                }
            }
        }

        Ok(CommandResults { results })
    }

    async fn get_instance_errors(&self, run_id: &str) -> SandboxResult<RuntimeErrors> {
        Ok(RuntimeErrors::new(self.instance(run_id)?.errors))
    }

    async fn clear_instance_errors(&self, run_id: &str) -> SandboxResult<ClearedErrors> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(run_id)
            .ok_or_else(|| SandboxError::not_found(run_id))?;
        let cleared = instance.errors.len();
        instance.errors.clear();
        Ok(ClearedErrors { cleared })
    }

    async fn run_static_analysis(
        &self,
        run_id: &str,
        files: Option<&[String]>,
    ) -> SandboxResult<StaticAnalysis> {
        let instance = self.instance(run_id)?;
        let lint = self
            .analysis_pass(&instance, self.lint_command.as_deref(), files)
            .await?;
        let typecheck = self
            .analysis_pass(&instance, self.typecheck_command.as_deref(), files)
            .await?;
        Ok(StaticAnalysis { lint, typecheck })
    }

    async fn deploy(&self, run_id: &str) -> SandboxResult<DeploymentResult> {
        self.instance(run_id)?;
        Err(SandboxError::Unsupported {
            backend: "workspace",
            operation: "deploy",
        })
    }

    async fn export_to_repository(
        &self,
        run_id: &str,
        _request: &RepositoryExportRequest,
    ) -> SandboxResult<RepositoryExport> {
        self.instance(run_id)?;
        Err(SandboxError::Unsupported {
            backend: "workspace",
            operation: "export_to_repository",
        })
    }

    async fn push_to_repository(
        &self,
        run_id: &str,
        _request: &RepositoryPushRequest,
    ) -> SandboxResult<RepositoryPush> {
        self.instance(run_id)?;
        Err(SandboxError::Unsupported {
            backend: "workspace",
            operation: "push_to_repository",
        })
    }

    async fn get_logs(&self, run_id: &str) -> SandboxResult<InstanceLogs> {
        Ok(self.instance(run_id)?.logs)
    }
}
