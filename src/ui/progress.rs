//! Terminal rendering of run events.

use crate::orchestrator::events::{RunEvent, RunSummary};
use crate::plan::types::EntryStatus;
use crate::ui::icons::{
    CHECK, CROSS, MERGE, PAUSE, REPAIR, RUNNING, SKIP, SPARKLE, WARN, WAVE,
};
use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;

/// Output mode for run progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UiMode {
    /// Progress bar with styled event lines
    #[default]
    Full,
    /// One JSON object per event on stdout
    Json,
}

/// Renders [`RunEvent`]s as they arrive.
///
/// In full mode a single bar tracks finished entries; event lines are printed
/// above it so they never tear the bar.
pub struct RunUI {
    mode: UiMode,
    bar: ProgressBar,
    term: Term,
}

impl RunUI {
    pub fn new(total_entries: usize, mode: UiMode) -> Self {
        let bar = if mode == UiMode::Full {
            let bar = ProgressBar::new(total_entries as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{prefix:.bold.dim} {spinner} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                    .expect("progress bar template is a valid static string")
                    .progress_chars("█▓▒░"),
            );
            bar.set_prefix("Plan");
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };
        Self {
            mode,
            bar,
            term: Term::stdout(),
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.bar.is_hidden() {
            let _ = writeln!(&self.term, "{}", msg.as_ref());
        } else {
            self.bar.println(msg.as_ref());
        }
    }

    pub fn handle_event(&self, event: &RunEvent) {
        match self.mode {
            UiMode::Json => {
                if let Ok(json) = serde_json::to_string(event) {
                    let _ = writeln!(&self.term, "{}", json);
                }
            }
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_full(&self, event: &RunEvent) {
        match event {
            RunEvent::Started {
                plan,
                feature_branch,
                entries,
            } => {
                self.print_line(format!(
                    "{}Executing {} ({} entries) on {}",
                    SPARKLE,
                    style(plan).bold(),
                    entries,
                    style(feature_branch).cyan()
                ));
            }
            RunEvent::EntryStarted { seq, branch } => {
                self.bar.set_message(format!("{} {}", style(seq).yellow(), branch));
                self.print_line(format!(
                    "{}{} on {}",
                    RUNNING,
                    style(seq).yellow().bold(),
                    style(branch).dim()
                ));
            }
            RunEvent::PrerequisitesMissing { seq, missing } => {
                self.print_line(format!(
                    "  {}{} is missing {}",
                    WARN,
                    style(seq).yellow(),
                    style(missing.join(", ")).red()
                ));
            }
            RunEvent::Resolution { seq, outcome } => {
                self.print_line(format!("  {}{}: {}", REPAIR, style(seq).yellow(), outcome));
            }
            RunEvent::EntryFinished { seq, status } => {
                let parsed = EntryStatus::parse(status);
                let icon = match parsed {
                    EntryStatus::Completed => &CHECK,
                    EntryStatus::Skipped => &SKIP,
                    EntryStatus::Partial => &WARN,
                    _ => &CROSS,
                };
                if parsed.is_terminal() {
                    self.bar.inc(1);
                }
                self.print_line(format!("  {}{} {}", icon, style(seq).yellow(), status));
            }
            RunEvent::Merged { seq, branch } => {
                self.print_line(format!(
                    "  {}merged {} ({})",
                    MERGE,
                    style(branch).dim(),
                    seq
                ));
            }
            RunEvent::MergeConflict { seq, branch, files } => {
                self.print_line(format!(
                    "  {}{} conflicts merging {}: {}",
                    CROSS,
                    style(seq).yellow(),
                    branch,
                    style(files.join(", ")).red()
                ));
            }
            RunEvent::WaveStarted { wave, seqs } => {
                self.print_line(format!(
                    "\n{}{} {}",
                    WAVE,
                    style(format!("Wave {}", wave)).cyan().bold(),
                    style(seqs.join(", ")).dim()
                ));
            }
            RunEvent::WaveCompleted {
                wave,
                succeeded,
                failed,
            } => {
                self.print_line(format!(
                    "{}Wave {} done: {} succeeded, {} failed",
                    WAVE, wave, succeeded, failed
                ));
            }
            RunEvent::Paused { reason } => {
                self.print_line(format!("{}{}", PAUSE, style(reason).yellow()));
            }
            RunEvent::Finished { summary } => {
                self.bar.finish_and_clear();
                self.print_line(render_summary(summary));
            }
        }
    }
}

/// Multi-line run summary.
pub fn render_summary(summary: &RunSummary) -> String {
    let headline = if summary.all_completed() {
        format!("{}{}", CHECK, style("All entries completed").green().bold())
    } else if let Some(reason) = &summary.paused_reason {
        format!("{}{} {}", PAUSE, style("Paused:").yellow().bold(), reason)
    } else {
        format!("{}{}", WARN, style("Run stopped with unfinished entries").yellow())
    };

    let mut out = vec![
        String::new(),
        headline,
        format!(
            "  completed {}  partial {}  failed {}  skipped {}  pending {}  (of {})",
            summary.completed,
            summary.partial,
            summary.failed,
            summary.skipped,
            summary.pending,
            summary.total
        ),
        format!("  feature branch: {}", style(&summary.feature_branch).cyan()),
    ];
    if !summary.merged_branches.is_empty() {
        out.push(format!("  merged: {}", summary.merged_branches.len()));
    }
    if let Some(url) = &summary.pr_url {
        out.push(format!("  pull request: {}", style(url).underlined()));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ui_mode_values() {
        use clap::ValueEnum;
        assert_eq!(UiMode::from_str("json", true).unwrap(), UiMode::Json);
        assert_eq!(UiMode::from_str("FULL", true).unwrap(), UiMode::Full);
        assert!(UiMode::from_str("fancy", true).is_err());
    }

    #[test]
    fn test_render_summary_paused() {
        console::set_colors_enabled(false);
        let summary = RunSummary {
            total: 3,
            completed: 1,
            pending: 2,
            feature_branch: "feat/auth".into(),
            paused_reason: Some("entry 02 is missing prerequisites".into()),
            ..Default::default()
        };
        let text = render_summary(&summary);
        assert!(text.contains("Paused: entry 02 is missing prerequisites"));
        assert!(text.contains("completed 1"));
        assert!(text.contains("feat/auth"));
    }

    #[test]
    fn test_handle_events_without_terminal() {
        let ui = RunUI::new(2, UiMode::Full);
        ui.handle_event(&RunEvent::EntryStarted {
            seq: "01".into(),
            branch: "feat/x--01-a".into(),
        });
        ui.handle_event(&RunEvent::EntryFinished {
            seq: "01".into(),
            status: "completed".into(),
        });
        assert_eq!(ui.bar.position(), 1);
    }
}
