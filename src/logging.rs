//! Tracing subscriber setup for the CLI.
//!
//! Events go to stderr as compact text or JSON, filtered by `STAGEFORGE_LOG`
//! (falling back to `info`, or `debug` for this crate with `--verbose`).
//! When a log directory is given, a daily-rolling JSON file is written
//! there as well.

use std::io::IsTerminal;
use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "STAGEFORGE_LOG";

const LOG_FILE_PREFIX: &str = "stageforge.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Flushes the file writer when dropped; hold it for the life of `main`.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

pub fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("stageforge=debug,info")
            } else {
                EnvFilter::try_new("stageforge=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
pub fn init(verbose: bool, format: LogFormat, log_dir: Option<&Path>) -> Result<LoggingGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let stderr_layer = match format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none())
            .with_target(verbose)
            .compact()
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .boxed(),
    };
    layers.push(stderr_layer);

    let mut file_guard = None;
    if let Some(dir) = log_dir.filter(|dir| dir.is_dir()) {
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json()
                .boxed(),
        );
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(verbose))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(LoggingGuard { _file: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn test_log_format_parses_from_cli_value() {
        assert_eq!(LogFormat::from_str("json", true).unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("text", true).unwrap(), LogFormat::Text);
        assert!(LogFormat::from_str("xml", true).is_err());
    }

    #[test]
    fn test_default_filter_builds() {
        let filter = env_filter(true).to_string();
        assert!(!filter.is_empty());
    }
}
