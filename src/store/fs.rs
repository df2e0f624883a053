//! Filesystem project store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/
//! ├── .lock                      # advisory lock held for every mutation
//! ├── index.json                 # global artifact index
//! └── <project>/
//!     ├── project.json           # stages and artifact history
//!     └── artifacts/<stage>/<artifact-id>.<ext>
//! ```

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Artifact, IndexEntry, Project, ProjectStore};

const LOCK_FILE: &str = ".lock";
const INDEX_FILE: &str = "index.json";
const PROJECT_FILE: &str = "project.json";

pub struct FsProjectStore {
    root: PathBuf,
}

impl FsProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `project` unless a project with the same id already exists.
    /// Returns true when the file was created.
    pub async fn ensure_project(&self, project: Project) -> Result<bool> {
        self.with_lock(move |root| {
            let path = project_file(root, &project.id)?;
            if path.exists() {
                return Ok(false);
            }
            write_json(&path, &project)?;
            Ok(true)
        })
        .await
    }

    /// Overwrite the stored project.
    pub async fn save_project(&self, project: Project) -> Result<()> {
        self.with_lock(move |root| {
            let path = project_file(root, &project.id)?;
            write_json(&path, &project)
        })
        .await
    }

    /// Run `f` on the blocking pool while holding the store's exclusive lock.
    async fn with_lock<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Path) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&root)
                .with_context(|| format!("Failed to create store root {}", root.display()))?;
            let lock_file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(root.join(LOCK_FILE))
                .context("Failed to open store lock file")?;
            lock_file
                .lock_exclusive()
                .context("Failed to lock project store")?;
            let result = f(&root);
            FileExt::unlock(&lock_file).context("Failed to unlock project store")?;
            result
        })
        .await
        .context("Project store task panicked")?
    }
}

fn validate_segment(kind: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
    {
        bail!("Invalid {} id: {:?}", kind, value);
    }
    Ok(())
}

fn project_file(root: &Path, project_id: &str) -> Result<PathBuf> {
    validate_segment("project", project_id)?;
    Ok(root.join(project_id).join(PROJECT_FILE))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn read_index(root: &Path) -> Result<Vec<IndexEntry>> {
    Ok(read_json(&root.join(INDEX_FILE))?.unwrap_or_default())
}

#[async_trait]
impl ProjectStore for FsProjectStore {
    async fn load_project(&self, project_id: &str) -> Result<Option<Project>> {
        let project_id = project_id.to_string();
        self.with_lock(move |root| read_json(&project_file(root, &project_id)?))
            .await
    }

    async fn materialize_resource(
        &self,
        project_id: &str,
        artifact: &Artifact,
        extension: &str,
    ) -> Result<String> {
        validate_segment("project", project_id)?;
        validate_segment("stage", &artifact.stage_id)?;
        validate_segment("artifact", &artifact.id)?;
        let relative = format!(
            "{}/artifacts/{}/{}.{}",
            project_id, artifact.stage_id, artifact.id, extension
        );
        let content = artifact.content.clone();
        let rel = relative.clone();
        self.with_lock(move |root| {
            let path = root.join(&rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(&path, content)
                .with_context(|| format!("Failed to write artifact {}", path.display()))
        })
        .await?;
        Ok(relative)
    }

    async fn append_artifact(
        &self,
        project_id: &str,
        stage_id: &str,
        artifact: Artifact,
    ) -> Result<()> {
        let project_id = project_id.to_string();
        let stage_id = stage_id.to_string();
        self.with_lock(move |root| {
            let path = project_file(root, &project_id)?;
            let mut project: Project =
                read_json(&path)?.unwrap_or_else(|| Project::new(&project_id, &project_id));
            project.stage_mut_or_insert(&stage_id).artifacts.push(artifact);
            write_json(&path, &project)
        })
        .await
    }

    async fn remove_artifact(
        &self,
        project_id: &str,
        stage_id: &str,
        artifact_id: &str,
    ) -> Result<()> {
        let project_id = project_id.to_string();
        let stage_id = stage_id.to_string();
        let artifact_id = artifact_id.to_string();
        self.with_lock(move |root| {
            let path = project_file(root, &project_id)?;
            let Some(mut project) = read_json::<Project>(&path)? else {
                return Ok(());
            };
            if let Some(stage) = project.stages.iter_mut().find(|s| s.id == stage_id) {
                stage.artifacts.retain(|a| a.id != artifact_id);
            }
            write_json(&path, &project)
        })
        .await
    }

    async fn delete_resource(&self, resource_path: &str) -> Result<()> {
        let relative = PathBuf::from(resource_path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            bail!("Refusing to delete resource outside the store: {}", resource_path);
        }
        self.with_lock(move |root| {
            let path = root.join(&relative);
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete resource {}", path.display()))
        })
        .await
    }

    async fn update_index(&self, entry: IndexEntry) -> Result<()> {
        self.with_lock(move |root| {
            let mut index = read_index(root)?;
            index.retain(|e| e.artifact_id != entry.artifact_id);
            index.push(entry);
            write_json(&root.join(INDEX_FILE), &index)
        })
        .await
    }

    async fn remove_from_index(&self, artifact_id: &str) -> Result<()> {
        let artifact_id = artifact_id.to_string();
        self.with_lock(move |root| {
            let mut index = read_index(root)?;
            let before = index.len();
            index.retain(|e| e.artifact_id != artifact_id);
            if index.len() != before {
                write_json(&root.join(INDEX_FILE), &index)?;
            }
            Ok(())
        })
        .await
    }

    async fn list_index(&self, project_id: &str) -> Result<Vec<IndexEntry>> {
        let project_id = project_id.to_string();
        self.with_lock(move |root| {
            Ok(read_index(root)?
                .into_iter()
                .filter(|e| e.project_id == project_id)
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ProjectStage;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ensure_project_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = FsProjectStore::new(dir.path());

        let mut project = Project::new("demo", "Demo");
        project.stages.push(ProjectStage::new("requirement", "Requirement"));
        assert!(store.ensure_project(project.clone()).await.unwrap());
        assert!(!store.ensure_project(Project::new("demo", "Other")).await.unwrap());

        let loaded = store.load_project("demo").await.unwrap().unwrap();
        assert_eq!(loaded, project);
        assert!(store.load_project("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_materialize_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsProjectStore::new(dir.path());
        let artifact = Artifact::new("artifact-1", "prd", "PRD", "requirement", "# PRD");

        let path = store.materialize_resource("demo", &artifact, "md").await.unwrap();
        assert_eq!(path, "demo/artifacts/requirement/artifact-1.md");
        assert_eq!(
            fs::read_to_string(dir.path().join(&path)).unwrap(),
            "# PRD"
        );

        store
            .append_artifact("demo", "requirement", artifact)
            .await
            .unwrap();
        let project = store.load_project("demo").await.unwrap().unwrap();
        assert_eq!(project.stage("requirement").unwrap().artifacts.len(), 1);

        store
            .remove_artifact("demo", "requirement", "artifact-1")
            .await
            .unwrap();
        store.delete_resource(&path).await.unwrap();
        assert!(!dir.path().join(&path).exists());
        assert!(store.delete_resource(&path).await.is_err());

        let project = store.load_project("demo").await.unwrap().unwrap();
        assert!(project.stage("requirement").unwrap().artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_index_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FsProjectStore::new(dir.path());
        let entry = IndexEntry {
            artifact_id: "artifact-1".into(),
            project_id: "demo".into(),
            stage_id: "requirement".into(),
            artifact_type: "prd".into(),
            name: "PRD".into(),
            resource_path: Some("demo/artifacts/requirement/artifact-1.md".into()),
            content_hash: "abc".into(),
            created_at: Utc::now(),
        };
        store.update_index(entry.clone()).await.unwrap();
        store.update_index(entry.clone()).await.unwrap();
        assert_eq!(store.list_index("demo").await.unwrap(), vec![entry]);
        assert!(store.list_index("other").await.unwrap().is_empty());

        store.remove_from_index("artifact-1").await.unwrap();
        assert!(store.list_index("demo").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FsProjectStore::new(dir.path());
        assert!(store.load_project("../escape").await.is_err());
        assert!(store.delete_resource("../outside.md").await.is_err());
        assert!(store.delete_resource("/etc/passwd").await.is_err());
    }
}
