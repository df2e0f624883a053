//! In-memory project store.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::{Artifact, IndexEntry, Project, ProjectStore};

#[derive(Default)]
struct State {
    projects: HashMap<String, Project>,
    resources: HashMap<String, String>,
    index: Vec<IndexEntry>,
}

/// Process-local [`ProjectStore`]; resources are kept as strings keyed by a
/// synthetic `memory://` path.
#[derive(Default)]
pub struct MemoryProjectStore {
    state: Mutex<State>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a project.
    pub fn with_project(self, project: Project) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.projects.insert(project.id.clone(), project);
        }
        self
    }

    /// Content of a materialized resource, if it still exists.
    pub fn resource(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.resources.get(path).cloned())
    }

    /// Register a resource directly, as an upstream writer would.
    pub fn put_resource(&self, path: &str, content: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.resources.insert(path.to_string(), content.to_string());
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| anyhow!("project store lock poisoned: {}", e))
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn load_project(&self, project_id: &str) -> Result<Option<Project>> {
        Ok(self.lock()?.projects.get(project_id).cloned())
    }

    async fn materialize_resource(
        &self,
        project_id: &str,
        artifact: &Artifact,
        extension: &str,
    ) -> Result<String> {
        let path = format!(
            "memory://{}/{}/{}.{}",
            project_id, artifact.stage_id, artifact.id, extension
        );
        self.lock()?
            .resources
            .insert(path.clone(), artifact.content.clone());
        Ok(path)
    }

    async fn append_artifact(
        &self,
        project_id: &str,
        stage_id: &str,
        artifact: Artifact,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let project = state
            .projects
            .entry(project_id.to_string())
            .or_insert_with(|| Project::new(project_id, project_id));
        project.stage_mut_or_insert(stage_id).artifacts.push(artifact);
        Ok(())
    }

    async fn remove_artifact(
        &self,
        project_id: &str,
        stage_id: &str,
        artifact_id: &str,
    ) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(stage) = state
            .projects
            .get_mut(project_id)
            .and_then(|p| p.stages.iter_mut().find(|s| s.id == stage_id))
        {
            stage.artifacts.retain(|a| a.id != artifact_id);
        }
        Ok(())
    }

    async fn delete_resource(&self, resource_path: &str) -> Result<()> {
        match self.lock()?.resources.remove(resource_path) {
            Some(_) => Ok(()),
            None => Err(anyhow!("resource not found: {}", resource_path)),
        }
    }

    async fn update_index(&self, entry: IndexEntry) -> Result<()> {
        let mut state = self.lock()?;
        state.index.retain(|e| e.artifact_id != entry.artifact_id);
        state.index.push(entry);
        Ok(())
    }

    async fn remove_from_index(&self, artifact_id: &str) -> Result<()> {
        self.lock()?.index.retain(|e| e.artifact_id != artifact_id);
        Ok(())
    }

    async fn list_index(&self, project_id: &str) -> Result<Vec<IndexEntry>> {
        Ok(self
            .lock()?
            .index
            .iter()
            .filter(|e| e.project_id == project_id)
            .cloned()
            .collect())
    }
}
