use clap::{Args, Parser, Subcommand};

use esrollup_core::{RollupConfig, DEFAULT_IN_HOST};

/// Roll up time-based Elasticsearch indexes into coarser ones.
///
/// Every index matching `--infilter` is read with a scroll cursor and its
/// documents are re-indexed into the index named by applying the date found
/// with `--inpattern` to `--outpattern`.
#[derive(Parser, Debug)]
#[command(name = "esrollup", version, about)]
pub struct CliArgs {
    #[command(flatten)]
    pub rollup: RollupArgs,

    /// Hide the progress display
    #[arg(long, global = true, env = "ROLLUP_SILENT")]
    pub silent: bool,

    /// Exit with status 2 when any index could not be read completely
    #[arg(long, env = "ROLLUP_FAIL_ON_PARTIAL")]
    pub fail_on_partial: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Time full rollups over a grid of thread counts and buffer sizes
    Bench(BenchArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RollupArgs {
    /// Regex matched against source index names
    #[arg(long, env = "ROLLUP_INFILTER", default_value = "", global = true)]
    pub infilter: String,

    /// Date layout of source index names, strftime style (e.g. logstash-%Y.%m.%d)
    #[arg(long, env = "ROLLUP_INPATTERN", default_value = "", global = true)]
    pub inpattern: String,

    /// Date layout of destination index names (e.g. logstash-%Y.%m)
    #[arg(long, env = "ROLLUP_OUTPATTERN", default_value = "", global = true)]
    pub outpattern: String,

    /// Cluster to read indexes from
    #[arg(long, env = "ROLLUP_INHOST", default_value = DEFAULT_IN_HOST, global = true)]
    pub inhost: String,

    /// Cluster to write indexes to (defaults to --inhost)
    #[arg(long, env = "ROLLUP_OUTHOST", global = true)]
    pub outhost: Option<String>,

    /// Indexes read concurrently
    #[arg(long, env = "ROLLUP_THREADS", default_value_t = 3, global = true)]
    pub threads: usize,

    /// Documents per scroll page and per bulk request
    #[arg(long, env = "ROLLUP_BUFFERSIZE", default_value_t = 1000, global = true)]
    pub buffersize: usize,
}

impl RollupArgs {
    pub fn to_config(&self) -> RollupConfig {
        RollupConfig {
            in_filter: self.infilter.clone(),
            in_pattern: self.inpattern.clone(),
            out_pattern: self.outpattern.clone(),
            in_host: self.inhost.clone(),
            out_host: self.outhost.clone().filter(|h| !h.trim().is_empty()),
            threads: self.threads,
            buffer_size: self.buffersize,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BenchArgs {
    /// Thread counts to try
    #[arg(long = "threads-grid", value_delimiter = ',', default_values_t = [1usize, 2, 3, 4, 5])]
    pub threads_grid: Vec<usize>,

    /// Buffer sizes to try
    #[arg(long = "buffers-grid", value_delimiter = ',', default_values_t = [100usize, 1000, 2000, 5000, 10000])]
    pub buffers_grid: Vec<usize>,

    /// Runs per combination
    #[arg(long, default_value_t = 3)]
    pub iterations: usize,
}
