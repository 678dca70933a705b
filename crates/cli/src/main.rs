mod benchmark;
mod cli;
mod progress;
mod rollup;
mod terminal;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use esrollup_core::{load_dotenv, ElasticConfig};

use crate::cli::{CliArgs, Command};
use crate::terminal::Terminal;

/// Exit status when `--fail-on-partial` is set and an index failed.
const EXIT_PARTIAL: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    load_dotenv();
    let args = CliArgs::parse();

    // Logs go to stderr; stdout belongs to the progress screen.
    let default_filter = if args.silent { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let elastic = ElasticConfig::from_env();
    elastic.log_summary();
    let config = args.rollup.to_config();

    if let Some(Command::Bench(bench)) = &args.command {
        benchmark::run(&config, &elastic, bench, args.silent).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let summary = rollup::run_once(&config, &elastic, args.silent).await?;
    info!(
        indexes = summary.indexes,
        received = summary.received,
        rejected = summary.rejected,
        succeeded = summary.sink.succeeded,
        failed = summary.sink.failed,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "rollup finished"
    );

    if summary.is_partial() {
        let terminal = Terminal;
        for failure in &summary.failed {
            terminal.print_error(&format!(
                "{} stopped after {} documents: {}",
                failure.source, failure.read, failure.error
            ))?;
        }
        if summary.rejected > 0 {
            terminal.print_error(&format!(
                "{} documents were refused by the destination",
                summary.rejected
            ))?;
        }
        if args.fail_on_partial {
            warn!(
                failed = summary.failed.len(),
                rejected = summary.rejected,
                "exiting with partial failure status"
            );
            return Ok(ExitCode::from(EXIT_PARTIAL));
        }
    }

    Ok(ExitCode::SUCCESS)
}
