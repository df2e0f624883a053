//! Run ledger inspection: `stageforge runs` and `stageforge session`.

use anyhow::{Result, anyhow, bail};
use console::style;
use std::path::Path;

use stageforge::ledger::{GenerationRun, RunFilter, RunStatus};
use stageforge::stageforge_config::StageforgeConfig;
use stageforge::ui::icons::{BLOCKER, CHECK, CROSS, RUNNING};

use super::open_ledger;

/// Filters accepted by `stageforge runs`.
pub struct RunsArgs {
    pub project: String,
    pub stage: Option<String>,
    pub artifact_type: Option<String>,
    pub status: Option<String>,
    pub limit: usize,
    pub json: bool,
}

pub async fn cmd_runs(project_dir: &Path, args: RunsArgs) -> Result<()> {
    let config = StageforgeConfig::new(project_dir.to_path_buf())?;
    let ledger = open_ledger(&config)?;

    let status = args
        .status
        .as_deref()
        .map(|s| s.parse::<RunStatus>().map_err(|e| anyhow!(e)))
        .transpose()?;
    let filter = RunFilter {
        project_id: Some(args.project.clone()),
        stage_id: args.stage.clone(),
        artifact_type: args.artifact_type.clone(),
        status,
        limit: Some(args.limit),
    };
    let runs = ledger.call(move |db| db.list_runs(&filter)).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs recorded for project {}", args.project);
        return Ok(());
    }

    println!();
    for run in &runs {
        println!("{}", run_line(run));
        if let Some(error) = &run.error {
            println!(
                "      {} {}",
                style(error.code.as_str()).red(),
                style(&error.message).dim()
            );
            if !error.missing_dependencies.is_empty() {
                println!(
                    "      missing: {}",
                    error.missing_dependencies.join(", ")
                );
            }
        }
    }
    println!();
    println!("{} run(s)", runs.len());
    Ok(())
}

fn run_line(run: &GenerationRun) -> String {
    let icon = match run.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Blocked => BLOCKER,
        RunStatus::Queued | RunStatus::Running => RUNNING,
    };
    format!(
        "{}{:<9} {} {}/{} {}",
        icon,
        run.status.as_str(),
        style(&run.run_id).dim(),
        run.stage_id,
        style(&run.artifact_type).cyan(),
        run.queued_at.format("%Y-%m-%d %H:%M:%S")
    )
}

pub async fn cmd_session(project_dir: &Path, run_id: &str, json: bool) -> Result<()> {
    let config = StageforgeConfig::new(project_dir.to_path_buf())?;
    let ledger = open_ledger(&config)?;

    let id = run_id.to_string();
    let (run, session) = ledger
        .call(move |db| Ok((db.get_run(&id)?, db.get_session(&id)?)))
        .await?;
    if run.is_none() && session.is_none() {
        bail!("No run or chunk session found for {}", run_id);
    }

    if json {
        let value = serde_json::json!({ "run": run, "session": session });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    if let Some(run) = &run {
        println!("{}", run_line(run));
        if let Some(result) = &run.result {
            println!(
                "  artifact {} ({} chars, {} tokens)",
                result.artifact_id, result.content_chars, result.tokens
            );
        }
        if let Some(trace) = &run.critique_trace {
            println!(
                "  critique: enabled={} revised={} issues={}",
                trace.enabled,
                trace.revised,
                trace.issues.len()
            );
        }
        if let Some(error) = &run.error {
            println!("  {} {}", style(error.code.as_str()).red(), error.message);
        }
    }

    match &session {
        Some(session) => {
            println!();
            println!(
                "Session {} ({}/{} rounds, resumable: {})",
                session.status.as_str(),
                session.completed_rounds,
                session.total_rounds,
                session.is_resumable()
            );
            for chunk in &session.chunks {
                println!(
                    "  round {:>2}  {:>7} chars  {}  {}",
                    chunk.round,
                    chunk.content_chars,
                    style(&chunk.content_hash).dim(),
                    chunk.finish_reason.as_deref().unwrap_or("-")
                );
            }
            if let Some(assembled) = &session.assembled {
                println!(
                    "  assembled {} chars, complete: {}",
                    assembled.content_chars, assembled.is_complete
                );
            }
        }
        None => println!("No chunk session recorded."),
    }
    println!();
    Ok(())
}
