//! Catalog inspection and validation: `stageforge catalog`.

use anyhow::{Result, bail};
use console::style;
use std::path::Path;
use std::sync::Arc;

use stageforge::catalog::Catalog;
use stageforge::resolver::resolve_order;
use stageforge::stageforge_config::StageforgeConfig;
use stageforge::template::{FileTemplateProvider, TemplateCache, TemplateProvider};
use stageforge::ui::icons::{CHECK, CROSS};

use super::super::CatalogCommands;

pub fn cmd_catalog(project_dir: &Path, command: Option<CatalogCommands>) -> Result<()> {
    let config = StageforgeConfig::new(project_dir.to_path_buf())?;
    let catalog_path = config.catalog_file();
    let source = if catalog_path.exists() {
        catalog_path.display().to_string()
    } else {
        "built-in default".to_string()
    };

    match command {
        None | Some(CatalogCommands::Show) => {
            let catalog = Catalog::load_or_default(&catalog_path)?;

            println!();
            println!("Catalog: {}", source);
            println!();
            for stage in &catalog.stages {
                println!("[{}] {}", style(&stage.id).bold(), stage.name);
                let order = resolve_order(&stage.outputs, &catalog);
                for artifact_type in order {
                    let Some(def) = catalog.artifact(&artifact_type) else {
                        continue;
                    };
                    let deps = if def.depends_on.is_empty() {
                        String::new()
                    } else {
                        format!(" ← {}", def.depends_on.join(", "))
                    };
                    println!(
                        "  {} {} .{}{}",
                        style(&artifact_type).cyan(),
                        style(def.kind.as_str()).dim(),
                        def.extension,
                        style(deps).dim()
                    );
                }
                println!();
            }
        }
        Some(CatalogCommands::Validate) => {
            println!();
            println!("Validating catalog ({})...", source);
            println!();

            let catalog = match Catalog::load_or_default(&catalog_path) {
                Ok(catalog) => catalog,
                Err(e) => {
                    println!("{}{}", CROSS, e);
                    bail!("Catalog is invalid");
                }
            };

            let provider = FileTemplateProvider::new(
                config.templates_dir(),
                Arc::new(TemplateCache::disabled()),
            );
            let mut problems = Vec::new();
            for def in catalog.artifacts.values() {
                if let Err(e) = provider.templates(def) {
                    problems.push(format!("{}: {:#}", def.id, e));
                }
            }

            if problems.is_empty() {
                println!(
                    "{}Catalog is valid: {} stage(s), {} artifact type(s).",
                    CHECK,
                    catalog.stages.len(),
                    catalog.artifacts.len()
                );
            } else {
                println!("Template problems:");
                for problem in &problems {
                    println!("  {}{}", CROSS, problem);
                }
                bail!("{} artifact type(s) have unreadable templates", problems.len());
            }
            println!();
        }
    }

    Ok(())
}
