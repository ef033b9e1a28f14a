//! Request and response types shared by every sandbox backend.
//!
//! Field names serialize in camelCase so the same types travel over the
//! remote runner's HTTP API and into tool payloads shown to the LLM.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, SandboxResult};

/// A single file inside a sandbox instance or template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxFile {
    #[serde(rename = "filePath", alias = "path")]
    pub path: String,
    #[serde(rename = "fileContents", alias = "content")]
    pub content: String,
}

impl SandboxFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Node kind in a template file tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Directory,
}

/// Hierarchical view of a template's files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTreeNode {
    pub path: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileTreeNode>,
}

impl FileTreeNode {
    /// Build a tree rooted at `/` from a flat list of file paths.
    ///
    /// Directories are listed before files at each level, both sorted.
    pub fn from_paths<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        let mut root = FileTreeNode {
            path: "/".to_string(),
            node_type: NodeType::Directory,
            children: Vec::new(),
        };

        for path in paths {
            let segments: Vec<&str> = path.split('/').collect();
            let mut node = &mut root;
            for depth in 0..segments.len() {
                let current = segments[..=depth].join("/");
                let is_file = depth == segments.len() - 1;
                let position = node.children.iter().position(|c| c.path == current);
                let index = match position {
                    Some(index) => index,
                    None => {
                        node.children.push(FileTreeNode {
                            path: current,
                            node_type: if is_file { NodeType::File } else { NodeType::Directory },
                            children: Vec::new(),
                        });
                        node.children.len() - 1
                    }
                };
                node = &mut node.children[index];
            }
        }

        root.sort();
        root
    }

    fn sort(&mut self) {
        self.children.sort_by(|a, b| {
            let rank = |n: &FileTreeNode| match n.node_type {
                NodeType::Directory => 0,
                NodeType::File => 1,
            };
            rank(a).cmp(&rank(b)).then_with(|| a.path.cmp(&b.path))
        });
        for child in &mut self.children {
            child.sort();
        }
    }

    /// Count file nodes in the tree.
    pub fn file_count(&self) -> usize {
        match self.node_type {
            NodeType::File => 1,
            NodeType::Directory => self.children.iter().map(|c| c.file_count()).sum(),
        }
    }
}

/// Human-readable template description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDescription {
    pub selection: String,
    pub usage: String,
}

/// Full details of a project template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDetails {
    pub name: String,
    pub description: TemplateDescription,
    pub file_tree: FileTreeNode,
    pub files: Vec<SandboxFile>,
    pub deps: BTreeMap<String, String>,
    #[serde(default)]
    pub dont_touch_files: Vec<String>,
    #[serde(default)]
    pub redacted_files: Vec<String>,
}

/// Parameters for creating a sandbox instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub template_name: String,
    pub project_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_vars: Option<HashMap<String, String>>,
}

impl CreateInstanceRequest {
    pub fn new(template_name: impl Into<String>, project_name: impl Into<String>) -> Self {
        Self {
            template_name: template_name.into(),
            project_name: project_name.into(),
            webhook_url: None,
            env_vars: None,
        }
    }

    pub fn webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Result of creating an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapInfo {
    pub run_id: String,
    #[serde(rename = "previewURL", alias = "previewUrl")]
    pub preview_url: String,
}

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Stopped,
}

/// Metadata of a live instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDetails {
    pub run_id: String,
    pub template_name: String,
    pub project_name: String,
    pub status: InstanceStatus,
    pub start_time: DateTime<Utc>,
    /// Seconds since creation.
    pub uptime: u64,
    pub directory: String,
    #[serde(rename = "previewURL", alias = "previewUrl")]
    pub preview_url: String,
}

/// Snapshot of all instances known to a backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceList {
    pub instances: Vec<InstanceDetails>,
    pub count: usize,
}

/// Health report for an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceHealth {
    pub pending: bool,
    pub is_healthy: bool,
    pub message: String,
    #[serde(rename = "previewURL", alias = "previewUrl")]
    pub preview_url: String,
}

/// Acknowledgement of a shutdown request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownAck {
    pub message: String,
    /// True when the instance did not exist (already shut down or unknown).
    #[serde(default)]
    pub already_stopped: bool,
}

/// Per-file outcome of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWriteResult {
    pub file: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileWriteResult {
    pub fn ok(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(file: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Outcome of a batch write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteFilesOutcome {
    pub message: String,
    pub results: Vec<FileWriteResult>,
}

impl WriteFilesOutcome {
    /// Build the outcome from per-file results.
    pub fn from_results(results: Vec<FileWriteResult>) -> Self {
        let written = results.iter().filter(|r| r.success).count();
        Self {
            message: format!("Wrote {} of {} files", written, results.len()),
            results,
        }
    }

    /// Check whether every file was written.
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    /// Get the files that failed to write.
    pub fn failed(&self) -> Vec<&FileWriteResult> {
        self.results.iter().filter(|r| !r.success).collect()
    }
}

/// Files returned by a read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileSet {
    pub files: Vec<SandboxFile>,
}

impl FileSet {
    /// Look up a file's content by path.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.content.as_str())
    }
}

/// Outcome of a single command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command: String,
    pub success: bool,
    pub output: String,
    pub exit_code: i32,
}

/// Ordered outcomes of a command batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResults {
    pub results: Vec<CommandResult>,
}

impl CommandResults {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

/// A runtime error captured from a running instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeError {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            file_path: None,
        }
    }

    pub fn in_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

/// Runtime errors accumulated by an instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeErrors {
    pub errors: Vec<RuntimeError>,
    pub has_errors: bool,
}

impl RuntimeErrors {
    pub fn new(errors: Vec<RuntimeError>) -> Self {
        let has_errors = !errors.is_empty();
        Self { errors, has_errors }
    }
}

/// Acknowledgement of clearing runtime errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearedErrors {
    pub cleared: usize,
}

/// Severity of a static-analysis issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    /// Parse a severity word as printed by common linters and compilers.
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "error" | "fatal" => Some(Self::Error),
            "warning" | "warn" => Some(Self::Warning),
            "info" | "note" | "hint" => Some(Self::Info),
            _ => None,
        }
    }
}

/// A single lint or type-check finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeIssue {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl CodeIssue {
    pub fn error(file_path: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            line,
            column: 1,
            severity: Severity::Error,
            message: message.into(),
            rule_id: None,
        }
    }

    pub fn warning(file_path: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(file_path, line, message)
        }
    }
}

/// Issue counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
}

/// One analysis pass (lint or type-check).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSection {
    pub issues: Vec<CodeIssue>,
    pub summary: AnalysisSummary,
}

impl AnalysisSection {
    /// Build a section, computing the summary from the issues.
    pub fn from_issues(issues: Vec<CodeIssue>) -> Self {
        let mut summary = AnalysisSummary::default();
        for issue in &issues {
            match issue.severity {
                Severity::Error => summary.error_count += 1,
                Severity::Warning => summary.warning_count += 1,
                Severity::Info => summary.info_count += 1,
            }
        }
        Self { issues, summary }
    }
}

/// Lint and type-check results, kept separate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAnalysis {
    pub lint: AnalysisSection,
    pub typecheck: AnalysisSection,
}

impl StaticAnalysis {
    /// All issues from both passes.
    pub fn all_issues(&self) -> impl Iterator<Item = &CodeIssue> {
        self.lint.issues.iter().chain(self.typecheck.issues.iter())
    }

    /// Total number of error-severity issues.
    pub fn error_count(&self) -> usize {
        self.lint.summary.error_count + self.typecheck.summary.error_count
    }

    pub fn is_clean(&self) -> bool {
        self.lint.issues.is_empty() && self.typecheck.issues.is_empty()
    }
}

/// Result of publishing an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResult {
    pub message: String,
    pub deployed_url: String,
}

/// Parameters for exporting an instance to a new repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryExportRequest {
    pub repository_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Result of exporting to a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryExport {
    pub repository_url: String,
}

/// Parameters for pushing an instance to an existing repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryPushRequest {
    pub repository_url: String,
    pub branch: String,
    pub commit_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Result of pushing to a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryPush {
    pub repository_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}

/// Captured process output of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceLogs {
    pub stdout: String,
    pub stderr: String,
}

/// Wire envelope: `{success: true, ...data}` or `{success: false, error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Convert a decoded envelope back into a result.
    ///
    /// `Instance not found` maps to [`SandboxError::InstanceNotFound`] so
    /// remote and local backends fail the same way.
    pub fn into_result(self, run_id: Option<&str>) -> SandboxResult<T> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(SandboxError::Remote(
                "response reported success without data".to_string(),
            )),
            (false, _) => {
                let error = self.error.unwrap_or_else(|| "unknown error".to_string());
                if error == "Instance not found" {
                    Err(SandboxError::not_found(run_id.unwrap_or_default()))
                } else {
                    Err(SandboxError::Remote(error))
                }
            }
        }
    }
}

impl<T> From<SandboxResult<T>> for Envelope<T> {
    fn from(result: SandboxResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}
