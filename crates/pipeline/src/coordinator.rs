//! Pipeline coordinator: spawns readers, drains the handoff into the sink,
//! and polls the ledger for progress and completion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use esrollup_core::{IndexTask, ProgressRecord};

use crate::admission::AdmissionGate;
use crate::discovery::{number_tasks, IndexMatcher};
use crate::error::{PipelineError, ReaderError, ReaderFailure};
use crate::handoff;
use crate::ledger::{all_done, ProgressLedger};
use crate::reader::{IndexReader, ReaderState};
use crate::traits::{BulkSink, ProgressRenderer, ScrollSource, SinkStats};

/// Documents between two ledger updates of a reader.
pub const DEFAULT_COUNT_UPDATE: u64 = 100;

/// Interval at which a waiting reader retries admission.
pub const DEFAULT_ADMISSION_POLL: Duration = Duration::from_millis(100);

/// Interval between progress reports and completion checks.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for one run of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum concurrently running readers.
    pub threads: usize,
    /// Documents per cursor page.
    pub page_size: usize,
    pub count_update: u64,
    pub admission_poll: Duration,
    pub progress_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threads: 3,
            page_size: 1000,
            count_update: DEFAULT_COUNT_UPDATE,
            admission_poll: DEFAULT_ADMISSION_POLL,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl PipelineConfig {
    pub fn new(threads: usize, page_size: usize) -> Self {
        Self {
            threads: threads.max(1),
            page_size: page_size.max(1),
            ..Self::default()
        }
    }
}

/// Progress of one matched index. `record` is `None` until its reader is admitted.
#[derive(Debug, Clone, Serialize)]
pub struct IndexProgress {
    pub source: String,
    pub destination: String,
    pub record: Option<ProgressRecord>,
}

impl IndexProgress {
    pub fn state(&self) -> ReaderState {
        ReaderState::of(self.record.as_ref())
    }
}

/// Everything a renderer needs for one progress tick.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub elapsed: Duration,
    /// Units received from readers so far.
    pub received: u64,
    /// Readers currently holding an admission slot.
    pub running: usize,
    pub sink: SinkStats,
    /// One entry per matched index, in ticket order.
    pub indexes: Vec<IndexProgress>,
}

impl ProgressReport {
    /// Average received documents per second.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.received as f64 / secs
        } else {
            0.0
        }
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RollupSummary {
    pub received: u64,
    /// Received units the sink refused to take.
    pub rejected: u64,
    /// Number of matched indexes.
    pub indexes: usize,
    pub failed: Vec<ReaderFailure>,
    pub sink: SinkStats,
    pub elapsed: Duration,
}

impl RollupSummary {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() || self.rejected > 0
    }
}

/// Runs readers against a source and forwards their documents to a sink.
pub struct Coordinator {
    source: Arc<dyn ScrollSource>,
    sink: Arc<dyn BulkSink>,
    renderer: Box<dyn ProgressRenderer>,
    config: PipelineConfig,
}

impl Coordinator {
    pub fn new(
        source: Arc<dyn ScrollSource>,
        sink: Arc<dyn BulkSink>,
        renderer: Box<dyn ProgressRenderer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            sink,
            renderer,
            config,
        }
    }

    /// List the source cluster, match index names, and roll them up.
    pub async fn rollup(&mut self, matcher: &IndexMatcher) -> Result<RollupSummary, PipelineError> {
        let names = self
            .source
            .index_names()
            .await
            .map_err(PipelineError::Discovery)?;
        let tasks = matcher.match_names(names)?;
        info!(matched = tasks.len(), "matched source indexes");
        self.run(tasks).await
    }

    /// Roll up `tasks`.
    ///
    /// Tasks are sorted by source name and renumbered with tickets 1..n; a
    /// source listed twice is read once. Completes once every task's ledger
    /// record is done, then flushes and closes the sink. Neither a failing
    /// reader nor a refused unit aborts the run.
    pub async fn run(&mut self, tasks: Vec<IndexTask>) -> Result<RollupSummary, PipelineError> {
        let start = Instant::now();
        let tasks = number_tasks(tasks);
        let expected = tasks.len();
        let gate = Arc::new(AdmissionGate::new(self.config.threads));
        let ledger = Arc::new(ProgressLedger::new());
        let (tx, mut rx) = handoff::channel();

        let mut readers = JoinSet::new();
        let mut reader_tasks = HashMap::with_capacity(expected);
        for task in &tasks {
            let reader = IndexReader::new(
                task.clone(),
                Arc::clone(&self.source),
                Arc::clone(&gate),
                Arc::clone(&ledger),
                tx.clone(),
                self.config.page_size,
                self.config.count_update,
                self.config.admission_poll,
            );
            let handle = readers.spawn(reader.run());
            reader_tasks.insert(handle.id(), task.clone());
        }
        drop(tx);
        info!(
            readers = expected,
            threads = gate.threads(),
            page_size = self.config.page_size,
            "readers spawned"
        );

        let mut received: u64 = 0;
        let mut rejected: u64 = 0;
        let mut failed = Vec::new();
        let mut ticker = tokio::time::interval(self.config.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        ticker.tick().await;

        let mut finished = expected == 0;
        while !finished {
            tokio::select! {
                Some(unit) = rx.recv() => {
                    received += 1;
                    if let Err(e) = self.sink.submit(unit).await {
                        rejected += 1;
                        if rejected == 1 {
                            error!(error = %e, "sink refused a document, continuing");
                        } else {
                            debug!(error = %e, rejected, "sink refused a document");
                        }
                    }
                }
                _ = ticker.tick() => {
                    let snapshot = ledger.snapshot();
                    finished = all_done(&snapshot, expected);
                    let report = self.report(&tasks, snapshot, start, received, gate.running());
                    self.renderer.render(&report);
                }
                Some(joined) = readers.join_next_with_id(), if !readers.is_empty() => {
                    collect_outcome(joined, &reader_tasks, &ledger, &mut failed);
                }
            }
        }

        while let Some(joined) = readers.join_next_with_id().await {
            collect_outcome(joined, &reader_tasks, &ledger, &mut failed);
        }

        info!(received, "all readers finished, flushing sink");
        self.sink.flush().await?;
        self.sink.close().await?;
        let sink = self.sink.stats();
        info!(
            indexed = sink.indexed,
            succeeded = sink.succeeded,
            failed = sink.failed,
            committed = sink.committed,
            "sink closed"
        );

        if !failed.is_empty() {
            warn!(failed = failed.len(), "rollup finished with failed indexes");
        }
        if rejected > 0 {
            warn!(rejected, "sink refused documents during the rollup");
        }

        Ok(RollupSummary {
            received,
            rejected,
            indexes: expected,
            failed,
            sink,
            elapsed: start.elapsed(),
        })
    }

    fn report(
        &self,
        tasks: &[IndexTask],
        snapshot: Vec<(String, ProgressRecord)>,
        start: Instant,
        received: u64,
        running: usize,
    ) -> ProgressReport {
        let mut records: HashMap<String, ProgressRecord> = snapshot.into_iter().collect();
        let indexes = tasks
            .iter()
            .map(|task| IndexProgress {
                source: task.source_name.clone(),
                destination: task.dest_name.clone(),
                record: records.remove(&task.source_name),
            })
            .collect();

        ProgressReport {
            elapsed: start.elapsed(),
            received,
            running,
            sink: self.sink.stats(),
            indexes,
        }
    }
}

/// Record a finished reader task. A panicked reader is finished as failed
/// in the ledger so that completion can still be reached; its record is
/// registered first if the reader never got that far.
fn collect_outcome(
    joined: Result<(Id, Result<u64, ReaderFailure>), JoinError>,
    reader_tasks: &HashMap<Id, IndexTask>,
    ledger: &ProgressLedger,
    failed: &mut Vec<ReaderFailure>,
) {
    let failure = match joined {
        Ok((_, Ok(_))) => return,
        Ok((_, Err(failure))) => failure,
        Err(e) => {
            let Some(task) = reader_tasks.get(&e.id()) else {
                error!(error = %e, "unknown reader task ended abnormally");
                return;
            };
            let read = match ledger.get(&task.source_name) {
                Some(record) => record.read_count,
                None => {
                    ledger.create(&task.source_name, &task.dest_name);
                    0
                }
            };
            ledger.mark_failed(&task.source_name, read);
            ReaderFailure {
                source: task.source_name.clone(),
                read,
                error: ReaderError::Panicked(e.to_string()),
            }
        }
    };

    error!(
        source = %failure.source,
        read = failure.read,
        error = %failure.error,
        "index read failed"
    );
    failed.push(failure);
}
