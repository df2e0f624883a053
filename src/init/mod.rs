//! Initialization of the `.stageforge/` state directory.
//!
//! ```text
//! .stageforge/
//! ├── stageforge.toml   # configuration (all fields defaulted)
//! ├── catalog.toml      # stages and artifact types
//! ├── templates/        # editable prompt templates
//! ├── projects/         # project store (projects, artifacts, index)
//! └── logs/             # daily-rolling log files
//! ```
//!
//! Files that already exist are never overwritten, so running `init`
//! again only fills in what is missing.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::assets::Assets;
use crate::stageforge_config::{CONFIG_FILE, STATE_DIR, StageforgeToml};

/// Result of initializing a stageforge project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the .stageforge directory
    pub state_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
    /// Files written by this call, relative to the state directory
    pub written: Vec<String>,
}

/// Initialize stageforge in the given directory.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let state_dir = get_state_dir(project_dir);
    let created = !state_dir.exists();

    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create directory: {}", state_dir.display()))?;
    let written = ensure_directory_structure(&state_dir)?;

    Ok(InitResult {
        state_dir,
        created,
        written,
    })
}

/// Ensure all required subdirectories and default files exist.
fn ensure_directory_structure(state_dir: &Path) -> Result<Vec<String>> {
    for sub in ["templates", "projects", "logs"] {
        let dir = state_dir.join(sub);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {} directory: {}", sub, dir.display()))?;
    }

    let mut written = Vec::new();

    let config_file = state_dir.join(CONFIG_FILE);
    if !config_file.exists() {
        StageforgeToml::default().save(&config_file)?;
        written.push(CONFIG_FILE.to_string());
    }

    for name in Assets::iter() {
        let relative = name.as_ref();
        if relative != "catalog.toml" && !relative.starts_with("templates/") {
            continue;
        }
        let target = state_dir.join(relative);
        if target.exists() {
            continue;
        }
        let Some(file) = Assets::get(relative) else {
            continue;
        };
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(&target, file.data.as_ref())
            .with_context(|| format!("Failed to write {}", target.display()))?;
        written.push(relative.to_string());
    }

    written.sort();
    Ok(written)
}

/// Check if a project is already initialized with stageforge.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(STATE_DIR).join(CONFIG_FILE).exists()
}

/// Get the path to the state directory for a project.
pub fn get_state_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(STATE_DIR)
}
