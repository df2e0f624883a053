use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stageforge::logging::{self, LogFormat};
use stageforge::stageforge_config::STATE_DIR;

mod cmd;

#[derive(Parser)]
#[command(name = "stageforge")]
#[command(version, about = "Staged generation of interdependent project artifacts")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Log output format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .stageforge directory with default config, catalog and templates
    Init,
    /// Generate artifact types of one stage, in dependency order
    Generate {
        /// Project id
        #[arg(long)]
        project: String,

        /// Stage id
        #[arg(long)]
        stage: String,

        /// Comma-separated artifact types to generate
        #[arg(long, value_delimiter = ',', required = true)]
        types: Vec<String>,

        /// Context value as KEY=VALUE (repeatable)
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// Context value read from a file, as KEY=PATH (repeatable)
        #[arg(long = "context-file", value_name = "KEY=PATH")]
        context_files: Vec<String>,

        /// Resume a previous run for a type, as TYPE=RUN_ID (repeatable)
        #[arg(long = "resume", value_name = "TYPE=RUN_ID")]
        resume: Vec<String>,
    },
    /// List generation runs recorded in the ledger
    Runs {
        #[arg(long)]
        project: String,

        #[arg(long)]
        stage: Option<String>,

        #[arg(long = "type")]
        artifact_type: Option<String>,

        /// queued, running, succeeded, failed or blocked
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,

        /// Print the runs as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one run and its chunk session
    Session {
        run_id: String,

        #[arg(long)]
        json: bool,
    },
    /// Manage projects in the project store
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Show or validate the artifact catalog
    Catalog {
        #[command(subcommand)]
        command: Option<CatalogCommands>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ProjectCommands {
    /// Create an empty project
    Create {
        id: String,

        #[arg(long)]
        name: Option<String>,
    },
    /// Override the artifact types a stage produces for one project
    Outputs {
        id: String,

        stage: String,

        /// Comma-separated types; empty restores the catalog outputs
        #[arg(value_delimiter = ',')]
        types: Vec<String>,
    },
    /// Show stages and artifacts of a project
    Show { id: String },
}

#[derive(Subcommand, Clone)]
pub enum CatalogCommands {
    Show,
    Validate,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    Show,
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let state_dir = project_dir.join(STATE_DIR);
    let log_dir = state_dir.join("logs");
    if state_dir.is_dir() && !log_dir.exists() {
        std::fs::create_dir_all(&log_dir).ok();
    }
    let _logging = logging::init(
        cli.verbose,
        cli.log_format,
        state_dir.is_dir().then_some(log_dir.as_path()),
    )?;

    match cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Generate {
            project,
            stage,
            types,
            context,
            context_files,
            resume,
        } => {
            cmd::cmd_generate(
                &project_dir,
                cli.verbose,
                cmd::generate::GenerateArgs {
                    project,
                    stage,
                    types,
                    context,
                    context_files,
                    resume,
                },
            )
            .await?
        }
        Commands::Runs {
            project,
            stage,
            artifact_type,
            status,
            limit,
            json,
        } => {
            cmd::cmd_runs(
                &project_dir,
                cmd::runs::RunsArgs {
                    project,
                    stage,
                    artifact_type,
                    status,
                    limit,
                    json,
                },
            )
            .await?
        }
        Commands::Session { run_id, json } => {
            cmd::cmd_session(&project_dir, &run_id, json).await?
        }
        Commands::Project { command } => cmd::cmd_project(&project_dir, command).await?,
        Commands::Catalog { command } => cmd::cmd_catalog(&project_dir, command)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command)?,
    }

    Ok(())
}
