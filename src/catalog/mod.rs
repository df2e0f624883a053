//! Artifact catalog: stages, artifact types and their dependency graph.
//!
//! The catalog is read-only configuration loaded from TOML and validated at
//! load time, so a dangling dependency or a cycle fails at startup instead
//! of surfacing mid-generation.
//!
//! ```toml
//! [[stages]]
//! id = "requirement"
//! name = "Requirement Analysis"
//! outputs = ["prd", "user-story"]
//!
//! [artifacts.prd]
//! name = "Product Requirements Document"
//! templates = ["prd.md"]
//!
//! [artifacts.user-story]
//! name = "User Stories"
//! templates = ["user-story.md"]
//! depends_on = ["prd"]
//! required_context = ["CONVERSATION"]
//! max_rounds = 3
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::assets::Assets;
use crate::errors::CatalogError;
use crate::generation::ArtifactKind;
use crate::resolver::DependencyGraph;
use crate::stageforge_config::GenerationOverride;

/// A pipeline stage and the artifact types it produces by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// An artifact type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactTypeDef {
    /// Catalog key, filled in after parsing
    #[serde(skip)]
    pub id: String,
    /// Display name; also the supersede key inside a stage
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: ArtifactKind,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Template paths relative to the templates root
    #[serde(default)]
    pub templates: Vec<String>,
    /// Prerequisite artifact types
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Context keys required even if no template mentions them
    #[serde(default)]
    pub required_context: Vec<String>,
    /// Extra constraints appended after the dependency inputs
    #[serde(default)]
    pub alignment: Vec<String>,
    /// Per-type loop budget (config overrides still apply on top)
    #[serde(flatten)]
    pub generation: GenerationOverride,
}

fn default_extension() -> String {
    "md".to_string()
}

impl ArtifactTypeDef {
    /// Definition for a type a project stage lists but the catalog lacks.
    pub fn ad_hoc(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            kind: ArtifactKind::default(),
            extension: default_extension(),
            templates: Vec::new(),
            depends_on: Vec::new(),
            required_context: Vec::new(),
            alignment: Vec::new(),
            generation: GenerationOverride::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub stages: Vec<StageDef>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactTypeDef>,
}

impl Catalog {
    /// Parse and validate catalog TOML.
    pub fn parse(content: &str) -> Result<Self, CatalogError> {
        let mut catalog: Catalog =
            toml::from_str(content).map_err(|e| CatalogError::Parse(e.to_string()))?;
        for (id, def) in catalog.artifacts.iter_mut() {
            def.id = id.clone();
        }
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load and validate a catalog file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// The catalog compiled into the binary.
    pub fn embedded_default() -> Result<Self, CatalogError> {
        let file = Assets::get("catalog.toml")
            .ok_or_else(|| CatalogError::Parse("embedded catalog.toml is missing".to_string()))?;
        let content = std::str::from_utf8(&file.data)
            .map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::parse(content)
    }

    /// Load `path` if it exists, otherwise the embedded default.
    pub fn load_or_default(path: &Path) -> Result<Self, CatalogError> {
        if path.exists() {
            Self::load(path)
        } else {
            Self::embedded_default()
        }
    }

    /// Check stage ids, stage outputs and dependency references, then
    /// reject cycles using Kahn's algorithm.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut stage_ids = HashSet::new();
        for stage in &self.stages {
            if !stage_ids.insert(stage.id.as_str()) {
                return Err(CatalogError::DuplicateStage {
                    id: stage.id.clone(),
                });
            }
            for output in &stage.outputs {
                if !self.artifacts.contains_key(output) {
                    return Err(CatalogError::UnknownOutput {
                        stage: stage.id.clone(),
                        artifact_type: output.clone(),
                    });
                }
            }
        }

        for (id, def) in &self.artifacts {
            for dep in &def.depends_on {
                if !self.artifacts.contains_key(dep) {
                    return Err(CatalogError::UnknownDependency {
                        artifact_type: id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.validate_no_cycles()
    }

    fn validate_no_cycles(&self) -> Result<(), CatalogError> {
        let mut in_degree: HashMap<&str, usize> = self
            .artifacts
            .iter()
            .map(|(id, def)| (id.as_str(), def.depends_on.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (id, def) in &self.artifacts {
            for dep in &def.depends_on {
                dependents.entry(dep.as_str()).or_default().push(id.as_str());
            }
        }

        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut processed = 0;
        while let Some(node) = queue.pop() {
            processed += 1;
            for &dependent in dependents.get(node).map(Vec::as_slice).unwrap_or_default() {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push(dependent);
                    }
                }
            }
        }

        if processed != self.artifacts.len() {
            let mut types: Vec<String> = in_degree
                .into_iter()
                .filter(|&(_, deg)| deg > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            types.sort();
            return Err(CatalogError::Cycle { types });
        }

        Ok(())
    }

    pub fn stage(&self, id: &str) -> Option<&StageDef> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn artifact(&self, id: &str) -> Option<&ArtifactTypeDef> {
        self.artifacts.get(id)
    }

    /// Display name for an artifact type, falling back to its id.
    pub fn display_name(&self, id: &str) -> String {
        self.artifacts
            .get(id)
            .map(|def| def.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn kind(&self, id: &str) -> ArtifactKind {
        self.artifacts.get(id).map(|def| def.kind).unwrap_or_default()
    }

    /// First stage whose default outputs include the artifact type.
    pub fn stage_for_output(&self, artifact_type: &str) -> Option<&StageDef> {
        self.stages
            .iter()
            .find(|s| s.outputs.iter().any(|o| o == artifact_type))
    }
}

impl DependencyGraph for Catalog {
    fn prerequisites(&self, artifact_type: &str) -> &[String] {
        self.artifacts
            .get(artifact_type)
            .map(|def| def.depends_on.as_slice())
            .unwrap_or_default()
    }
}
