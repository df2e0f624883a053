//! Stage generation command: `stageforge generate`.

use anyhow::{Context, Result, bail};
use console::style;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stageforge::catalog::Catalog;
use stageforge::engine::{GenerationRequest, StageEngine};
use stageforge::errors::EngineError;
use stageforge::llm::ChatCompletionsGenerator;
use stageforge::stageforge_config::StageforgeConfig;
use stageforge::store::FsProjectStore;
use stageforge::template::{FileTemplateProvider, TemplateCache};
use stageforge::ui::StageProgressUI;
use stageforge::ui::icons::{BLOCKER, CHECK};

use super::open_ledger;

/// Arguments of one `generate` invocation.
pub struct GenerateArgs {
    pub project: String,
    pub stage: String,
    pub types: Vec<String>,
    pub context: Vec<String>,
    pub context_files: Vec<String>,
    pub resume: Vec<String>,
}

pub async fn cmd_generate(project_dir: &Path, verbose: bool, args: GenerateArgs) -> Result<()> {
    let config = StageforgeConfig::with_cli_args(project_dir.to_path_buf(), verbose)?;
    for warning in config.validate() {
        tracing::warn!(%warning, "configuration warning");
    }

    let mut context = parse_pairs(&args.context, "--context")?;
    for (key, path) in parse_pairs(&args.context_files, "--context-file")? {
        let path = project_dir.join(path);
        let value = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read context file {}", path.display()))?;
        context.insert(key, value);
    }
    let resume = parse_pairs(&args.resume, "--resume")?;

    let catalog = Catalog::load_or_default(&config.catalog_file())
        .with_context(|| format!("Failed to load catalog {}", config.catalog_file().display()))?;
    let generator = ChatCompletionsGenerator::from_config(&config.toml.llm)?;
    let cache = Arc::new(TemplateCache::new(
        config.toml.templates.cache_capacity,
        Duration::from_secs(config.toml.templates.cache_ttl_secs),
    ));
    let templates = FileTemplateProvider::new(config.templates_dir(), cache);
    let store = FsProjectStore::new(config.projects_dir());
    let ledger = open_ledger(&config)?;

    let types: Vec<String> = args
        .types
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    let progress = Arc::new(StageProgressUI::new(types.len() as u64, verbose));

    let engine = StageEngine::new(
        Arc::new(catalog),
        config.toml.clone(),
        Arc::new(generator),
        Arc::new(templates),
        Arc::new(store),
        ledger,
    )
    .with_progress(progress.clone());

    let request = GenerationRequest {
        project_id: args.project.clone(),
        stage_id: args.stage.clone(),
        artifact_types: types,
        context,
        resume,
    };

    match engine.generate_stage(&request).await {
        Ok(artifacts) => {
            progress.finish();
            println!();
            println!(
                "{}Generated {} artifact(s) for {} / {}",
                CHECK,
                artifacts.len(),
                style(&args.project).cyan(),
                style(&args.stage).cyan()
            );
            for artifact in &artifacts {
                println!(
                    "  {} {} {}",
                    style(&artifact.artifact_type).bold(),
                    style(&artifact.id).dim(),
                    artifact.resource_path.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Err(e) => {
            progress.fail(&e.to_string());
            if matches!(
                e,
                EngineError::DependencyMissing { .. }
                    | EngineError::GenerationCall { .. }
                    | EngineError::ArtifactPersist { .. }
            ) {
                eprintln!(
                    "{}Run closed with {}. Inspect it with `stageforge runs --project {}`.",
                    BLOCKER,
                    e.run_error_code(),
                    args.project
                );
            }
            Err(e.into())
        }
    }
}

/// Parse repeated `KEY=VALUE` arguments.
pub fn parse_pairs(values: &[String], flag: &str) -> Result<HashMap<String, String>> {
    let mut pairs = HashMap::new();
    for raw in values {
        let Some((key, value)) = raw.split_once('=') else {
            bail!("{} expects KEY=VALUE, got '{}'", flag, raw);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("{} has an empty key in '{}'", flag, raw);
        }
        pairs.insert(key.to_string(), value.to_string());
    }
    Ok(pairs)
}
