//! Upstream artifact store: projects, their stages and per-stage artifact
//! history, plus a global artifact index.
//!
//! - `fs`: JSON files under a root directory, guarded by an advisory lock
//! - `memory`: in-process store for tests and embedding

pub mod fs;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::critique::CritiqueTrace;

pub use fs::FsProjectStore;
pub use memory::MemoryProjectStore;

/// Digest metadata attached to an artifact for reuse as dependency input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDigest {
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub source_chars: usize,
    pub compressed_chars: usize,
    pub algorithm: String,
    pub generated_at: DateTime<Utc>,
}

/// How an artifact was produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMeta {
    pub run_id: String,
    pub model: String,
    pub rounds: u32,
    pub is_complete: bool,
    #[serde(default)]
    pub repaired: bool,
    #[serde(default)]
    pub finish_reasons: Vec<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Display name; unique within a stage
    pub name: String,
    pub stage_id: String,
    pub content: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub context_summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub compressed_context: String,
    #[serde(default)]
    pub context_digest: Option<ArtifactDigest>,
    #[serde(default)]
    pub critique_trace: Option<CritiqueTrace>,
    #[serde(default)]
    pub generation_meta: Option<GenerationMeta>,
    #[serde(default)]
    pub resource_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn default_source() -> String {
    "generated".to_string()
}

impl Artifact {
    /// A bare artifact with no digest, as an upstream tool might write it.
    pub fn new(
        id: impl Into<String>,
        artifact_type: impl Into<String>,
        name: impl Into<String>,
        stage_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            artifact_type: artifact_type.into(),
            name: name.into(),
            stage_id: stage_id.into(),
            content: content.into(),
            source: default_source(),
            tokens: 0,
            context_summary: String::new(),
            key_points: Vec::new(),
            compressed_context: String::new(),
            context_digest: None,
            critique_trace: None,
            generation_meta: None,
            resource_path: None,
            created_at: Utc::now(),
        }
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStage {
    pub id: String,
    pub name: String,
    /// Project-level override of the catalog's default outputs
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Artifact history, oldest first
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl ProjectStage {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            outputs: Vec::new(),
            artifacts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub stages: Vec<ProjectStage>,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn stage(&self, stage_id: &str) -> Option<&ProjectStage> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    /// Get a stage, appending an empty one when it does not exist yet.
    pub fn stage_mut_or_insert(&mut self, stage_id: &str) -> &mut ProjectStage {
        let idx = match self.stages.iter().position(|s| s.id == stage_id) {
            Some(idx) => idx,
            None => {
                self.stages.push(ProjectStage::new(stage_id, stage_id));
                self.stages.len() - 1
            }
        };
        &mut self.stages[idx]
    }
}

/// Global artifact index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub artifact_id: String,
    pub project_id: String,
    pub stage_id: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub name: String,
    pub resource_path: Option<String>,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Persistence seam for projects and artifacts.
///
/// `append_artifact` is the hard write of a generation; the engine treats
/// every other mutation as bookkeeping.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn load_project(&self, project_id: &str) -> Result<Option<Project>>;

    /// Write the artifact body to a physical resource; returns its path.
    async fn materialize_resource(
        &self,
        project_id: &str,
        artifact: &Artifact,
        extension: &str,
    ) -> Result<String>;

    /// Append to the stage's history, creating project or stage if absent.
    async fn append_artifact(
        &self,
        project_id: &str,
        stage_id: &str,
        artifact: Artifact,
    ) -> Result<()>;

    async fn remove_artifact(
        &self,
        project_id: &str,
        stage_id: &str,
        artifact_id: &str,
    ) -> Result<()>;

    async fn delete_resource(&self, resource_path: &str) -> Result<()>;

    async fn update_index(&self, entry: IndexEntry) -> Result<()>;

    async fn remove_from_index(&self, artifact_id: &str) -> Result<()>;

    async fn list_index(&self, project_id: &str) -> Result<Vec<IndexEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_json_uses_type_key() {
        let artifact = Artifact::new("artifact-1", "prd", "PRD", "requirement", "# PRD");
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["type"], "prd");
        assert_eq!(json["source"], "generated");

        let back: Artifact = serde_json::from_value(json).unwrap();
        assert_eq!(back, artifact);
    }

    #[test]
    fn test_artifact_defaults_when_fields_missing() {
        let json = serde_json::json!({
            "id": "a1",
            "type": "prd",
            "name": "PRD",
            "stage_id": "requirement",
            "content": "text",
            "created_at": "2025-01-01T00:00:00Z"
        });
        let artifact: Artifact = serde_json::from_value(json).unwrap();
        assert!(artifact.context_summary.is_empty());
        assert!(artifact.resource_path.is_none());
        assert!(artifact.has_content());
    }

    #[test]
    fn test_stage_mut_or_insert() {
        let mut project = Project::new("p1", "Demo");
        project.stage_mut_or_insert("design").outputs.push("prototype".into());
        project.stage_mut_or_insert("design");
        assert_eq!(project.stages.len(), 1);
        assert_eq!(project.stage("design").unwrap().outputs, vec!["prototype"]);
        assert!(project.stage("missing").is_none());
    }
}
