//! Terminal output: a spinner that follows the job watcher and a coloured
//! summary per job.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use smsrelay::state_machine::{JobStatus, JobSummary};
use smsrelay::watcher::WatcherState;

pub struct RelayProgress {
    pb: ProgressBar,
    total: usize,
}

impl RelayProgress {
    pub fn start(total: usize) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        let progress = Self { pb, total };
        progress.update(&WatcherState::Idle, 0);
        progress
    }

    pub fn update(&self, state: &WatcherState, settled: usize) {
        self.pb
            .set_message(format!("[{settled}/{}] {state}", self.total));
    }

    pub fn note(&self, line: &str) {
        self.pb.println(format!("  {line}"));
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

pub fn print_summary(summaries: &[JobSummary]) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let yellow = Style::new().yellow();
    let dim = Style::new().dim();

    println!();
    println!("{}", dim.apply_to("─── Jobs ───"));
    for summary in summaries {
        let (mark, style) = match summary.status {
            Some(JobStatus::Completed) if summary.failed == 0 => ("✓", &green),
            Some(JobStatus::Completed) => ("!", &yellow),
            Some(JobStatus::ErrorMalformedData) => ("✗", &red),
            _ => ("…", &yellow),
        };
        let status = summary
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "  {} {} {}  {} msgs: {} delivered, {} sent, {} pending, {} failed",
            style.apply_to(mark),
            summary.job_id,
            style.apply_to(status),
            summary.total,
            summary.delivered,
            summary.sent,
            summary.pending,
            summary.failed,
        );
    }
}
