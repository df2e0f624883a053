//! Artifact finalization: supersede same-named artifacts, attach the
//! dependency digest and persist into the target stage.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::context::{COMPRESSION_ALGORITHM, CompressionSettings, compress};
use crate::store::{Artifact, ArtifactDigest, IndexEntry, ProjectStore};
use crate::util::content_hash;

pub struct ArtifactFinalizer {
    store: Arc<dyn ProjectStore>,
    compression: CompressionSettings,
}

impl ArtifactFinalizer {
    pub fn new(store: Arc<dyn ProjectStore>, compression: CompressionSettings) -> Self {
        Self { store, compression }
    }

    /// Persist `artifact` into `stage_id`.
    ///
    /// Only materializing and appending the artifact can fail the call;
    /// superseding and index maintenance are logged and skipped on error.
    pub async fn finalize(
        &self,
        project_id: &str,
        stage_id: &str,
        artifact: Artifact,
        extension: &str,
    ) -> Result<Artifact> {
        let superseded = self
            .supersede(project_id, stage_id, &artifact.name, &artifact.id)
            .await;
        if !superseded.is_empty() {
            info!(
                project_id,
                stage_id,
                name = %artifact.name,
                superseded = ?superseded,
                "superseded artifacts with the same name"
            );
        }

        let mut artifact = self.with_digest(artifact);
        artifact.stage_id = stage_id.to_string();

        let resource_path = self
            .store
            .materialize_resource(project_id, &artifact, extension)
            .await
            .context("Failed to materialize artifact resource")?;
        artifact.resource_path = Some(resource_path.clone());

        self.store
            .append_artifact(project_id, stage_id, artifact.clone())
            .await
            .context("Failed to append artifact to stage")?;

        let entry = IndexEntry {
            artifact_id: artifact.id.clone(),
            project_id: project_id.to_string(),
            stage_id: stage_id.to_string(),
            artifact_type: artifact.artifact_type.clone(),
            name: artifact.name.clone(),
            resource_path: Some(resource_path),
            content_hash: content_hash(&artifact.content),
            created_at: artifact.created_at,
        };
        if let Err(e) = self.store.update_index(entry).await {
            warn!(
                project_id,
                artifact_id = %artifact.id,
                error = %e,
                "failed to update artifact index"
            );
        }

        Ok(artifact)
    }

    /// Attach summary, key points, compressed context and digest metadata.
    pub fn with_digest(&self, mut artifact: Artifact) -> Artifact {
        let compressed = compress(&artifact.content, &self.compression);
        artifact.context_digest = Some(ArtifactDigest {
            artifact_type: artifact.artifact_type.clone(),
            source_chars: compressed.source_chars,
            compressed_chars: compressed.compressed_chars,
            algorithm: COMPRESSION_ALGORITHM.to_string(),
            generated_at: Utc::now(),
        });
        artifact.context_summary = compressed.summary;
        artifact.key_points = compressed.key_points;
        artifact.compressed_context = compressed.compressed;
        artifact
    }

    /// Remove artifacts in the stage named `name`, other than `keep_id`.
    /// An artifact whose resource cannot be deleted stays in place.
    /// Returns the ids that were removed.
    pub async fn supersede(
        &self,
        project_id: &str,
        stage_id: &str,
        name: &str,
        keep_id: &str,
    ) -> Vec<String> {
        let project = match self.store.load_project(project_id).await {
            Ok(Some(project)) => project,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(project_id, error = %e, "failed to load project for supersede");
                return Vec::new();
            }
        };
        let Some(stage) = project.stage(stage_id) else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        for old in stage
            .artifacts
            .iter()
            .filter(|a| a.name == name && a.id != keep_id)
        {
            if let Some(path) = &old.resource_path
                && let Err(e) = self.store.delete_resource(path).await
            {
                warn!(
                    project_id,
                    stage_id,
                    artifact_id = %old.id,
                    resource_path = %path,
                    error = %e,
                    "failed to delete superseded resource, keeping old artifact"
                );
                continue;
            }

            if let Err(e) = self
                .store
                .remove_artifact(project_id, stage_id, &old.id)
                .await
            {
                warn!(
                    project_id,
                    stage_id,
                    artifact_id = %old.id,
                    error = %e,
                    "failed to remove superseded artifact"
                );
                continue;
            }
            if let Err(e) = self.store.remove_from_index(&old.id).await {
                warn!(artifact_id = %old.id, error = %e, "failed to remove superseded index entry");
            }
            debug!(project_id, stage_id, artifact_id = %old.id, "artifact superseded");
            removed.push(old.id.clone());
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryProjectStore, Project, ProjectStage};

    fn finalizer(store: Arc<MemoryProjectStore>) -> ArtifactFinalizer {
        ArtifactFinalizer::new(store, CompressionSettings::default())
    }

    fn project_with(artifacts: Vec<Artifact>) -> Project {
        let mut project = Project::new("p1", "Demo");
        let mut stage = ProjectStage::new("requirement", "Requirement");
        stage.artifacts = artifacts;
        project.stages.push(stage);
        project
    }

    #[tokio::test]
    async fn test_finalize_supersedes_same_name() {
        let mut old = Artifact::new("old", "prd", "PRD", "requirement", "old body");
        old.resource_path = Some("memory://p1/requirement/old.md".into());
        let other = Artifact::new("other", "user-story", "User Stories", "requirement", "x");
        let store =
            Arc::new(MemoryProjectStore::new().with_project(project_with(vec![old, other])));
        store.put_resource("memory://p1/requirement/old.md", "old body");

        let new = Artifact::new("new", "prd", "PRD", "requirement", "# PRD\n- goal one\n");
        let saved = finalizer(store.clone())
            .finalize("p1", "requirement", new, "md")
            .await
            .unwrap();

        let project = store.load_project("p1").await.unwrap().unwrap();
        let stage = project.stage("requirement").unwrap();
        let prds: Vec<_> = stage.artifacts.iter().filter(|a| a.name == "PRD").collect();
        assert_eq!(prds.len(), 1);
        assert_eq!(prds[0].id, "new");
        assert_eq!(stage.artifacts.len(), 2);
        assert!(store.resource("memory://p1/requirement/old.md").is_none());

        let path = saved.resource_path.clone().unwrap();
        assert_eq!(store.resource(&path).as_deref(), Some("# PRD\n- goal one\n"));
        let index = store.list_index("p1").await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].artifact_id, "new");
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_old_artifact() {
        let mut old = Artifact::new("old", "prd", "PRD", "requirement", "old body");
        old.resource_path = Some("memory://missing".into());
        let store = Arc::new(MemoryProjectStore::new().with_project(project_with(vec![old])));

        let new = Artifact::new("new", "prd", "PRD", "requirement", "new body");
        finalizer(store.clone())
            .finalize("p1", "requirement", new, "md")
            .await
            .unwrap();

        let project = store.load_project("p1").await.unwrap().unwrap();
        let ids: Vec<_> = project
            .stage("requirement")
            .unwrap()
            .artifacts
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(ids, vec!["old", "new"]);
    }

    #[tokio::test]
    async fn test_finalize_attaches_digest_and_target_stage() {
        let store = Arc::new(MemoryProjectStore::new());
        let content = "# Design Spec\n## Colors\n- Primary blue\n- Must support dark mode\n";
        let artifact = Artifact::new("a1", "design-spec", "Design Spec", "requirement", content);
        let saved = finalizer(store.clone())
            .finalize("p1", "design", artifact, "md")
            .await
            .unwrap();

        assert_eq!(saved.stage_id, "design");
        let digest = saved.context_digest.unwrap();
        assert_eq!(digest.algorithm, COMPRESSION_ALGORITHM);
        assert_eq!(digest.artifact_type, "design-spec");
        assert_eq!(digest.source_chars, content.chars().count());
        assert!(!saved.key_points.is_empty());
        assert!(saved.compressed_context.contains("[Key Points]"));

        let project = store.load_project("p1").await.unwrap().unwrap();
        assert_eq!(project.stage("design").unwrap().artifacts.len(), 1);
    }
}
