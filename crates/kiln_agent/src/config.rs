//! Kiln configuration file.
//!
//! Loaded from `.kiln/config.toml`, then overlaid with environment
//! variables. Command-line flags are applied last by the CLI.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kiln_core::GenerationMode;
use kiln_sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AgentError, AgentResult};
use crate::orchestrator::OrchestratorConfig;

/// Generation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub mode: GenerationMode,
    pub review_cycles: u32,
    pub max_iterations: u32,
    pub max_phases: usize,
    pub review_commands: Vec<String>,
    pub deploy_on_finalize: bool,
    /// Per-turn inference timeout in seconds (0 = none).
    pub turn_timeout_secs: u64,
    /// Sandbox command timeout in seconds (0 = none).
    pub command_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            mode: GenerationMode::Deterministic,
            review_cycles: 10,
            max_iterations: 20,
            max_phases: 12,
            review_commands: Vec::new(),
            deploy_on_finalize: false,
            turn_timeout_secs: 0,
            command_timeout_secs: 0,
        }
    }
}

/// Language model selection. API keys only come from the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `openai` or `anthropic`; detected from the available key when unset.
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// Complete Kiln configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    pub sandbox: SandboxConfig,
    pub generation: GenerationConfig,
    pub llm: LlmConfig,
}

impl KilnConfig {
    /// Default location relative to a project root.
    pub fn default_path(root: &Path) -> PathBuf {
        root.join(".kiln").join("config.toml")
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> AgentResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `<root>/.kiln/config.toml` if present, then apply the environment.
    pub fn load(root: &Path) -> AgentResult<Self> {
        let path = Self::default_path(root);
        let mut config = if path.exists() {
            debug!("Loading config from {}", path.display());
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay environment variables.
    pub fn apply_env(&mut self) -> AgentResult<()> {
        self.sandbox
            .apply_env()
            .map_err(|e| AgentError::Config(e.to_string()))?;
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> AgentResult<()> {
        if let Some(mode) = var("KILN_MODE") {
            self.generation.mode = mode.parse()?;
        }
        if let Some(cycles) = var("KILN_REVIEW_CYCLES") {
            self.generation.review_cycles = cycles
                .parse()
                .map_err(|_| AgentError::Config(format!("invalid KILN_REVIEW_CYCLES '{}'", cycles)))?;
        }
        if let Some(provider) = var("KILN_LLM_PROVIDER") {
            self.llm.provider = Some(provider);
        }
        Ok(())
    }

    /// Settings for one orchestrator run.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let secs = |s: u64| (s > 0).then(|| Duration::from_secs(s));
        let generation = &self.generation;
        OrchestratorConfig {
            mode: generation.mode,
            review_cycles: generation.review_cycles,
            max_iterations: generation.max_iterations,
            max_phases: generation.max_phases,
            review_commands: generation.review_commands.clone(),
            deploy_on_finalize: generation.deploy_on_finalize,
            turn_timeout: secs(generation.turn_timeout_secs),
            command_timeout: secs(generation.command_timeout_secs)
                .or_else(|| self.sandbox.command_timeout()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_sandbox::SandboxBackend;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = KilnConfig::default();
        let orchestrator = config.orchestrator_config();

        assert_eq!(orchestrator.review_cycles, 10);
        assert_eq!(orchestrator.max_iterations, 20);
        assert_eq!(orchestrator.max_phases, 12);
        assert!(orchestrator.turn_timeout.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
[sandbox]
backend = "workspace"
workspace_root = "/tmp/kiln"

[generation]
mode = "directed"
review_cycles = 3
review_commands = ["npm test"]
turn_timeout_secs = 30

[llm]
provider = "anthropic"
"#,
        )
        .unwrap();

        let config = KilnConfig::from_file(&path).unwrap();
        assert_eq!(config.sandbox.backend, SandboxBackend::Workspace);
        assert_eq!(config.generation.mode, GenerationMode::Directed);
        assert_eq!(config.generation.max_iterations, 20);
        assert_eq!(config.llm.provider.as_deref(), Some("anthropic"));

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.review_commands, vec!["npm test"]);
        assert_eq!(orchestrator.turn_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[generation\nmode = ").unwrap();

        assert!(matches!(KilnConfig::from_file(&path), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [("KILN_MODE", "smart"), ("KILN_REVIEW_CYCLES", "2")]
            .into_iter()
            .collect();
        let mut config = KilnConfig::default();
        config
            .apply_vars(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.generation.mode, GenerationMode::Directed);
        assert_eq!(config.generation.review_cycles, 2);

        let bad: HashMap<&str, &str> = [("KILN_REVIEW_CYCLES", "many")].into_iter().collect();
        assert!(config.apply_vars(|key| bad.get(key).map(|v| v.to_string())).is_err());
    }
}
