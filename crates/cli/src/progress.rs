//! Console progress screen redrawn on every coordinator tick.

use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use esrollup_core::ProgressRecord;
use esrollup_pipeline::{ProgressRenderer, ProgressReport, ReaderState};

use crate::terminal::{Colors, Table, Terminal};

/// Status column of the progress table.
pub fn status_label(record: Option<&ProgressRecord>) -> &'static str {
    match ReaderState::of(record) {
        ReaderState::Failed => "FAILED",
        ReaderState::Done => "COMPLETE",
        ReaderState::Reading if record.is_some_and(|r| r.read_count > 0) => "IN PROGRESS",
        ReaderState::Reading | ReaderState::WaitingForAdmission => "PENDING",
    }
}

pub fn reading_line(report: &ProgressReport) -> String {
    let workers = if report.running == 1 { "worker" } else { "workers" };
    format!(
        "{} documents read by {} {} (avg {}/sec)",
        report.received,
        report.running,
        workers,
        report.rate() as u64
    )
}

pub fn committed_line(report: &ProgressReport) -> String {
    format!(
        "{} documents committed ({} failed)",
        report.sink.succeeded, report.sink.failed
    )
}

pub fn progress_table(report: &ProgressReport) -> Table {
    let mut table = Table::new(["Status", "Source", "Destination", "Records"]);
    for index in &report.indexes {
        let records = index.record.as_ref().map_or(0, |r| r.read_count);
        table.push_row(vec![
            status_label(index.record.as_ref()).to_string(),
            index.source.clone(),
            index.destination.clone(),
            records.to_string(),
        ]);
    }
    table
}

fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.1?}", elapsed)
}

/// Clears the console and draws the progress screen.
pub struct ConsoleProgress {
    terminal: Terminal,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self { terminal: Terminal }
    }

    fn draw(&self, report: &ProgressReport) -> Result<()> {
        self.terminal.clear()?;
        self.terminal
            .print_info(&format!("Elapsed: {}", format_elapsed(report.elapsed)))?;
        self.terminal
            .print_colored(Colors::ACTIVE, &reading_line(report))?;
        self.terminal
            .print_colored(Colors::OK, &committed_line(report))?;
        self.terminal.print_table(&progress_table(report))
    }
}

impl ProgressRenderer for ConsoleProgress {
    fn render(&mut self, report: &ProgressReport) {
        if let Err(e) = self.draw(report) {
            debug!(error = %e, "failed to draw progress");
        }
    }
}
