use crate::engine::ProgressListener;
use crate::generation::ChunkReport;
use crate::store::Artifact;
use crate::ui::icons::{CHECK, CROSS, FILE_NEW, RUNNING};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal progress for one stage generation request.
///
/// Two bars are stacked vertically:
/// - Artifact bar: how many of the selected types are done
/// - Round bar: spinner with the current type and round
pub struct StageProgressUI {
    multi: MultiProgress,
    artifact_bar: ProgressBar,
    round_bar: ProgressBar,
    verbose: bool,
}

impl StageProgressUI {
    pub fn new(total_types: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let artifact_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let artifact_bar = multi.add(ProgressBar::new(total_types));
        artifact_bar.set_style(artifact_style);
        artifact_bar.set_prefix("Artifacts");

        let round_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let round_bar = multi.add(ProgressBar::new_spinner());
        round_bar.set_style(round_style);
        round_bar.set_prefix("   Round");

        Self {
            multi,
            artifact_bar,
            round_bar,
            verbose,
        }
    }

    /// Print a line above the bars, falling back to `eprintln!`.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Stop the spinner and report the failure.
    pub fn fail(&self, message: &str) {
        self.round_bar.finish_and_clear();
        self.artifact_bar.abandon();
        self.print_line(format!("{}{}", CROSS, style(message).red()));
    }

    pub fn finish(&self) {
        self.round_bar.finish_and_clear();
        self.artifact_bar.finish_with_message(format!("{}done", CHECK));
    }
}

impl ProgressListener for StageProgressUI {
    fn artifact_started(&self, artifact_type: &str, position: usize, total: usize) {
        self.artifact_bar
            .set_message(format!("{}", style(artifact_type).yellow()));
        self.round_bar.set_message(format!(
            "{}{} {}",
            RUNNING,
            style(artifact_type).cyan(),
            style(format!("({}/{}) starting...", position + 1, total)).dim()
        ));
        self.round_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    fn round_finished(&self, artifact_type: &str, report: &ChunkReport) {
        self.round_bar.set_message(format!(
            "{}{} round {}/{} {}",
            RUNNING,
            style(artifact_type).cyan(),
            report.round,
            report.total_rounds,
            style(format!("({} chars)", report.piece.chars().count())).dim()
        ));
        if self.verbose {
            self.print_line(format!(
                "    {} {} round {} finished ({})",
                style("→").dim(),
                artifact_type,
                report.round,
                report.finish_reason.as_deref().unwrap_or("unknown")
            ));
        }
    }

    fn artifact_finished(&self, artifact: &Artifact) {
        self.artifact_bar.inc(1);
        let location = artifact
            .resource_path
            .as_deref()
            .unwrap_or(artifact.id.as_str());
        self.print_line(format!(
            "{}{} {}",
            FILE_NEW,
            style(&artifact.name).green(),
            style(location).dim()
        ));
    }
}
