//! Sandbox backend configuration.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SandboxError;

/// Which sandbox backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    /// In-memory mock.
    #[default]
    Local,
    /// Directories on disk plus local processes.
    Workspace,
    /// HTTP sandbox runner service.
    Remote,
}

impl SandboxBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Workspace => "workspace",
            Self::Remote => "remote",
        }
    }
}

impl std::fmt::Display for SandboxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SandboxBackend {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "mock" => Ok(Self::Local),
            "workspace" | "process" => Ok(Self::Workspace),
            "remote" | "runner" => Ok(Self::Remote),
            other => Err(SandboxError::Config(format!("unknown sandbox backend '{}'", other))),
        }
    }
}

/// Configuration shared by all backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub backend: SandboxBackend,
    /// Base URL of the remote runner service.
    pub service_url: Option<String>,
    /// Bearer token for the remote runner service.
    pub api_key: Option<String>,
    /// Root directory for workspace instances.
    pub workspace_root: PathBuf,
    /// Additional template directory loaded into the catalog.
    pub templates_dir: Option<PathBuf>,
    /// Lint command used by the workspace backend's static analysis.
    pub lint_command: Option<String>,
    /// Type-check command used by the workspace backend's static analysis.
    pub typecheck_command: Option<String>,
    /// Default command timeout in seconds (0 = none).
    pub command_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Local,
            service_url: None,
            api_key: None,
            workspace_root: PathBuf::from(".kiln/instances"),
            templates_dir: None,
            lint_command: None,
            typecheck_command: None,
            command_timeout_secs: 0,
        }
    }
}

impl SandboxConfig {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn workspace(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: SandboxBackend::Workspace,
            workspace_root: root.into(),
            ..Self::default()
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            backend: SandboxBackend::Remote,
            service_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn lint_command(mut self, command: impl Into<String>) -> Self {
        self.lint_command = Some(command.into());
        self
    }

    pub fn typecheck_command(mut self, command: impl Into<String>) -> Self {
        self.typecheck_command = Some(command.into());
        self
    }

    /// Build a configuration from defaults plus environment variables.
    pub fn from_env() -> Result<Self, SandboxError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay environment variables onto this configuration.
    ///
    /// `KILN_SANDBOX_BACKEND` wins over `SANDBOX_SERVICE_TYPE`; the latter
    /// only recognizes `runner` and leaves the backend alone otherwise.
    pub fn apply_env(&mut self) -> Result<(), SandboxError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), SandboxError> {
        if let Some(kind) = var("SANDBOX_SERVICE_TYPE") {
            if kind.trim().eq_ignore_ascii_case("runner") {
                self.backend = SandboxBackend::Remote;
            }
        }
        if let Some(backend) = var("KILN_SANDBOX_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(url) = var("SANDBOX_SERVICE_URL") {
            self.service_url = Some(url);
        }
        if let Some(key) = var("SANDBOX_SERVICE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(root) = var("KILN_SANDBOX_ROOT") {
            self.workspace_root = PathBuf::from(root);
        }
        Ok(())
    }

    /// Default timeout for command execution, if any.
    pub fn command_timeout(&self) -> Option<std::time::Duration> {
        (self.command_timeout_secs > 0)
            .then(|| std::time::Duration::from_secs(self.command_timeout_secs))
    }
}
