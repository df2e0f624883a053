//! Configuration view and validation commands: `stageforge config`.

use anyhow::Result;
use std::path::Path;

use stageforge::init::get_state_dir;
use stageforge::stageforge_config::{CONFIG_FILE, StageforgeConfig, StageforgeToml};
use stageforge::ui::icons::CHECK;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = get_state_dir(project_dir).join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Stageforge Configuration");
            println!("========================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                StageforgeToml::load(&config_path)?
            } else {
                println!("No stageforge.toml found at {}", config_path.display());
                println!("Using default configuration:");
                StageforgeToml::default()
            };
            println!();

            println!("[llm]");
            println!("  base_url = \"{}\"", toml.llm.base_url);
            println!("  model = \"{}\"", toml.llm.model);
            println!("  api_key_env = \"{}\"", toml.llm.api_key_env);
            println!("  timeout_secs = {}", toml.llm.timeout_secs);
            println!();

            let generation = &toml.generation;
            println!("[generation]");
            println!("  max_rounds = {}", generation.max_rounds);
            println!("  chunk_max_tokens = {}", generation.chunk_max_tokens);
            println!(
                "  structured_end_marker = \"{}\"",
                generation.structured_end_marker
            );
            println!(
                "  continuation_tail_chars = {}",
                generation.continuation_tail_chars
            );
            println!("  critique = {}", generation.critique);
            println!("  revise_max_tokens = {}", generation.revise_max_tokens);
            println!(
                "  inter_artifact_delay_ms = {}",
                generation.inter_artifact_delay_ms
            );
            println!();

            if !generation.overrides.is_empty() {
                println!("[generation.overrides]");
                let mut patterns: Vec<&String> = generation.overrides.keys().collect();
                patterns.sort();
                for pattern in patterns {
                    let override_cfg = &generation.overrides[pattern];
                    println!("  \"{}\":", pattern);
                    if let Some(rounds) = override_cfg.max_rounds {
                        println!("    max_rounds = {}", rounds);
                    }
                    if let Some(tokens) = override_cfg.chunk_max_tokens {
                        println!("    chunk_max_tokens = {}", tokens);
                    }
                    if let Some(critique) = override_cfg.critique {
                        println!("    critique = {}", critique);
                    }
                }
                println!();
            }

            println!("[context]");
            println!("  value_max_chars = {}", toml.context.value_max_chars);
            println!("  total_budget_chars = {}", toml.context.total_budget_chars);
            println!(
                "  dependency_max_chars = {}",
                toml.context.dependency_max_chars
            );
            println!();
            println!("[ledger]");
            println!("  stale_after_minutes = {}", toml.ledger.stale_after_minutes);
            println!();
            println!("[templates]");
            println!("  cache_capacity = {}", toml.templates.cache_capacity);
            println!("  cache_ttl_secs = {}", toml.templates.cache_ttl_secs);
            println!();

            if project_dir.exists() {
                let config = StageforgeConfig::new(project_dir.to_path_buf())?;
                println!("Effective values (with env overrides):");
                println!("  model = \"{}\"", config.toml.llm.model);
                println!("  base_url = \"{}\"", config.toml.llm.base_url);
                println!("  api_key_env = \"{}\"", config.toml.llm.api_key_env);
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No stageforge.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = StageforgeToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("{}Configuration is valid.", CHECK);
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
