//! Throughput benchmark over thread counts and buffer sizes.
//!
//! Each combination runs the whole rollup `iterations` times. Every run
//! builds its own coordinator, so no state carries over between runs.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::info;

use esrollup_core::{ElasticConfig, RollupConfig};

use crate::cli::BenchArgs;
use crate::rollup;
use crate::terminal::{Table, Terminal};

/// One grid cell. Ordered by threads, then buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BenchmarkSet {
    pub threads: usize,
    pub buffers: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BenchmarkResult {
    pub runs: Vec<Duration>,
    /// Set once every iteration of the set has run.
    pub average: Option<Duration>,
}

pub struct BenchmarkTable {
    results: BTreeMap<BenchmarkSet, BenchmarkResult>,
    iterations: usize,
}

impl BenchmarkTable {
    /// Empty results for every combination of the grid.
    pub fn new(threads: &[usize], buffers: &[usize], iterations: usize) -> Self {
        let results = threads
            .iter()
            .flat_map(|&t| {
                buffers.iter().map(move |&b| {
                    (
                        BenchmarkSet {
                            threads: t,
                            buffers: b,
                        },
                        BenchmarkResult::default(),
                    )
                })
            })
            .collect();
        Self {
            results,
            iterations,
        }
    }

    pub fn record(&mut self, set: BenchmarkSet, elapsed: Duration) {
        let iterations = self.iterations;
        let result = self.results.entry(set).or_default();
        result.runs.push(elapsed);
        if result.runs.len() == iterations {
            result.average = Some(average(&result.runs));
        }
    }

    pub fn get(&self, set: &BenchmarkSet) -> Option<&BenchmarkResult> {
        self.results.get(set)
    }

    pub fn table(&self) -> Table {
        let mut headers = vec!["Threads".to_string(), "Buffers".to_string(), "Average".to_string()];
        headers.extend((1..=self.iterations).map(|i| i.to_string()));
        let mut table = Table::new(headers);

        for (set, result) in &self.results {
            let mut row = vec![
                set.threads.to_string(),
                set.buffers.to_string(),
                result.average.map(format_duration).unwrap_or_default(),
            ];
            row.extend(result.runs.iter().copied().map(format_duration));
            table.push_row(row);
        }
        table
    }
}

pub fn average(runs: &[Duration]) -> Duration {
    if runs.is_empty() {
        return Duration::ZERO;
    }
    let total: Duration = runs.iter().sum();
    total / runs.len() as u32
}

fn format_duration(d: Duration) -> String {
    format!("{:.2?}", d)
}

fn print_table(terminal: &Terminal, table: &BenchmarkTable) -> Result<()> {
    terminal.clear()?;
    terminal.print_header("Running benchmark...")?;
    terminal.print_table(&table.table())
}

/// Run the grid and keep the result table on screen.
pub async fn run(
    base: &RollupConfig,
    elastic: &ElasticConfig,
    args: &BenchArgs,
    silent: bool,
) -> Result<BenchmarkTable> {
    let iterations = args.iterations.max(1);
    let mut results = BenchmarkTable::new(&args.threads_grid, &args.buffers_grid, iterations);
    let terminal = Terminal;
    print_table(&terminal, &results)?;

    for &threads in &args.threads_grid {
        for &buffers in &args.buffers_grid {
            let set = BenchmarkSet { threads, buffers };
            let config = RollupConfig {
                threads,
                buffer_size: buffers,
                ..base.clone()
            };

            for iteration in 1..=iterations {
                let start = Instant::now();
                let summary = rollup::run_once(&config, elastic, silent).await?;
                let elapsed = start.elapsed();
                info!(
                    threads,
                    buffers,
                    iteration,
                    elapsed_ms = elapsed.as_millis() as u64,
                    received = summary.received,
                    "benchmark run finished"
                );
                results.record(set, elapsed);
                print_table(&terminal, &results)?;
            }
            if let Some(average) = results.get(&set).and_then(|r| r.average) {
                info!(
                    threads,
                    buffers,
                    average_ms = average.as_millis() as u64,
                    "benchmark set finished"
                );
            }
        }
    }

    Ok(results)
}
