//! Initialization and project store commands.

use anyhow::{Result, bail};
use console::style;
use std::path::Path;

use stageforge::init::{init_project, is_initialized};
use stageforge::stageforge_config::StageforgeConfig;
use stageforge::store::fs::FsProjectStore;
use stageforge::store::{Project, ProjectStore};
use stageforge::ui::icons::{CHECK, FILE_NEW, SPARKLE};

use super::super::ProjectCommands;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    let was_initialized = is_initialized(project_dir);

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "{}Initialized stageforge project at {}",
            SPARKLE,
            result.state_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .stageforge/");
        println!("  ├── stageforge.toml   # Generation, context and ledger settings");
        println!("  ├── catalog.toml      # Stages and artifact types");
        println!("  ├── templates/        # Prompt templates (edit freely)");
        println!("  ├── projects/         # Generated artifacts");
        println!("  └── logs/             # Daily log files");
        println!();
        println!("Next steps:");
        println!("  1. Export the API key named in [llm] api_key_env");
        println!("  2. Run `stageforge catalog validate` after editing the catalog");
        println!("  3. Run `stageforge generate --project <id> --stage <id> --types <a,b>`");
    } else if was_initialized {
        println!(
            "{}Stageforge project already initialized at {}",
            CHECK,
            result.state_dir.display()
        );
        if result.written.is_empty() {
            println!("Directory structure verified.");
        }
    } else {
        println!(
            "{}Completed stageforge initialization at {}",
            CHECK,
            result.state_dir.display()
        );
    }

    if !result.created {
        for file in &result.written {
            println!("  {}restored {}", FILE_NEW, style(file).dim());
        }
    }

    Ok(())
}

pub async fn cmd_project(project_dir: &Path, command: ProjectCommands) -> Result<()> {
    let config = StageforgeConfig::new(project_dir.to_path_buf())?;
    let store = FsProjectStore::new(config.projects_dir());

    match command {
        ProjectCommands::Create { id, name } => {
            let name = name.unwrap_or_else(|| id.clone());
            if store.ensure_project(Project::new(&id, name)).await? {
                println!("{}Created project {}", CHECK, style(&id).cyan());
            } else {
                println!("Project {} already exists", style(&id).cyan());
            }
        }
        ProjectCommands::Outputs { id, stage, types } => {
            let Some(mut project) = store.load_project(&id).await? else {
                bail!("Project {} not found. Run `stageforge project create {}` first.", id, id);
            };
            let outputs: Vec<String> = types
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            project.stage_mut_or_insert(&stage).outputs = outputs.clone();
            store.save_project(project).await?;

            if outputs.is_empty() {
                println!(
                    "{}Stage {} of {} now uses the catalog outputs",
                    CHECK, stage, id
                );
            } else {
                println!(
                    "{}Stage {} of {} outputs: {}",
                    CHECK,
                    stage,
                    id,
                    outputs.join(", ")
                );
            }
        }
        ProjectCommands::Show { id } => {
            let Some(project) = store.load_project(&id).await? else {
                bail!("Project {} not found", id);
            };

            println!();
            println!("{} ({})", style(&project.name).bold(), project.id);
            println!();
            if project.stages.is_empty() {
                println!("  No stages yet.");
            }
            for stage in &project.stages {
                println!("[{}] {}", stage.id, stage.name);
                if !stage.outputs.is_empty() {
                    println!("  outputs = {}", stage.outputs.join(", "));
                }
                for artifact in &stage.artifacts {
                    println!(
                        "  {} {} {}",
                        style(&artifact.id).dim(),
                        artifact.artifact_type,
                        artifact.resource_path.as_deref().unwrap_or("-")
                    );
                }
            }

            let index = store.list_index(&id).await?;
            println!();
            println!("Indexed artifacts: {}", index.len());
            println!();
        }
    }

    Ok(())
}
