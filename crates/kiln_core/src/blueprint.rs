//! Project blueprint.
//!
//! The blueprint is the structured plan produced before generation starts.
//! It is created once per session and never modified by tools.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A file the plan expects a phase to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConcept {
    pub path: String,
    #[serde(default)]
    pub purpose: String,
}

impl FileConcept {
    pub fn new(path: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            purpose: purpose.into(),
        }
    }
}

/// One step of the implementation roadmap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseConcept {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub files: Vec<FileConcept>,
}

impl PhaseConcept {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            files: Vec::new(),
        }
    }

    pub fn file(mut self, path: impl Into<String>, purpose: impl Into<String>) -> Self {
        self.files.push(FileConcept::new(path, purpose));
        self
    }
}

/// Structured project plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    pub title: String,
    pub project_name: String,
    #[serde(default)]
    pub description: String,
    pub template: String,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub implementation_roadmap: Vec<PhaseConcept>,
}

impl Blueprint {
    pub fn new(title: impl Into<String>, project_name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            project_name: project_name.into(),
            description: String::new(),
            template: template.into(),
            frameworks: Vec::new(),
            implementation_roadmap: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn framework(mut self, framework: impl Into<String>) -> Self {
        self.frameworks.push(framework.into());
        self
    }

    pub fn phase(mut self, phase: PhaseConcept) -> Self {
        self.implementation_roadmap.push(phase);
        self
    }

    /// Number of files the roadmap plans in total.
    pub fn planned_file_count(&self) -> usize {
        self.implementation_roadmap.iter().map(|p| p.files.len()).sum()
    }

    /// Check required fields.
    pub fn validate(&self) -> CoreResult<()> {
        if self.project_name.trim().is_empty() {
            return Err(CoreError::InvalidBlueprint("projectName is empty".to_string()));
        }
        if self.template.trim().is_empty() {
            return Err(CoreError::InvalidBlueprint("template is empty".to_string()));
        }
        if let Some(phase) = self.implementation_roadmap.iter().find(|p| p.name.trim().is_empty()) {
            return Err(CoreError::InvalidBlueprint(format!(
                "roadmap phase without a name: {:?}",
                phase.description
            )));
        }
        Ok(())
    }

    /// Load a blueprint from a JSON or YAML file, chosen by extension.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(path)?;
        let blueprint: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        blueprint.validate()?;
        Ok(blueprint)
    }
}
