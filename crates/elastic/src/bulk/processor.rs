//! Worker pool committing bulk requests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use esrollup_core::{ElasticConfig, SinkError, TransferUnit};
use esrollup_pipeline::{BulkSink, SinkStats};

use super::batcher::BulkBatcher;
use super::request::{encode_bulk, BulkOutcome};
use crate::client::ElasticClient;

/// Units a worker queue holds before `submit` waits.
const QUEUE_DEPTH_PER_WORKER: usize = 1024;

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct BulkConfig {
    pub workers: usize,
    /// Actions per bulk request.
    pub bulk_actions: usize,
    /// Commit a partial batch this long after its first action.
    pub flush_interval: Option<Duration>,
    /// Retries after the first attempt for retryable failures.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub queue_depth: usize,
}

impl BulkConfig {
    pub fn new(config: &ElasticConfig, bulk_actions: usize) -> Self {
        Self {
            workers: config.bulk_workers.max(1),
            bulk_actions: bulk_actions.max(1),
            flush_interval: config.bulk_flush_interval(),
            max_retries: config.bulk_max_retries,
            initial_backoff: INITIAL_BACKOFF,
            queue_depth: QUEUE_DEPTH_PER_WORKER,
        }
    }
}

/// Live counters shared by the processor and its workers.
#[derive(Debug, Default)]
pub struct BulkStats {
    submitted: AtomicU64,
    indexed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    committed: AtomicU64,
    flushed: AtomicU64,
}

impl BulkStats {
    pub fn snapshot(&self) -> SinkStats {
        SinkStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
        }
    }
}

enum Command {
    Index(TransferUnit),
    Flush(oneshot::Sender<()>),
}

/// [`BulkSink`] over the `_bulk` API with a fixed pool of worker tasks.
///
/// Units are spread round-robin over the workers. Each worker owns a
/// bounded queue, so a slow cluster pushes back on `submit`.
pub struct BulkProcessor {
    queues: Mutex<Vec<mpsc::Sender<Command>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    closed: AtomicBool,
    stats: Arc<BulkStats>,
}

impl BulkProcessor {
    /// Start the worker pool. Must be called within a tokio runtime.
    pub fn start(client: ElasticClient, config: BulkConfig) -> Self {
        let stats = Arc::new(BulkStats::default());
        let committer = Arc::new(Committer {
            client,
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
            stats: Arc::clone(&stats),
        });

        let mut queues = Vec::with_capacity(config.workers);
        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers.max(1) {
            let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
            let batcher = BulkBatcher::new(config.bulk_actions, config.flush_interval);
            workers.push(tokio::spawn(run_worker(id, rx, batcher, Arc::clone(&committer))));
            queues.push(tx);
        }

        info!(
            workers = queues.len(),
            bulk_actions = config.bulk_actions,
            flush_interval_ms = config.flush_interval.map(|d| d.as_millis() as u64),
            max_retries = config.max_retries,
            "bulk processor started"
        );

        Self {
            queues: Mutex::new(queues),
            workers: Mutex::new(workers),
            next: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            stats,
        }
    }

    fn queue(&self) -> Option<mpsc::Sender<Command>> {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if queues.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % queues.len();
        Some(queues[i].clone())
    }

    fn all_queues(&self) -> Vec<mpsc::Sender<Command>> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BulkSink for BulkProcessor {
    async fn submit(&self, unit: TransferUnit) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        let queue = self.queue().ok_or(SinkError::Closed)?;
        queue
            .send(Command::Index(unit))
            .await
            .map_err(|_| SinkError::Closed)?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let mut acks = Vec::new();
        for queue in self.all_queues() {
            let (tx, rx) = oneshot::channel();
            if queue.send(Command::Flush(tx)).await.is_ok() {
                acks.push(rx);
            }
        }
        for result in futures::future::join_all(acks).await {
            if result.is_err() {
                warn!("bulk worker exited before acknowledging flush");
            }
        }
        self.stats.flushed.fetch_add(1, Ordering::Relaxed);
        debug!("bulk processor flushed");
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Workers drain their batch once their queue closes.
        drop(std::mem::take(
            &mut *self.queues.lock().unwrap_or_else(PoisonError::into_inner),
        ));
        let workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "bulk worker ended abnormally");
            }
        }

        let stats = self.stats.snapshot();
        info!(
            indexed = stats.indexed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            committed = stats.committed,
            "bulk processor closed"
        );
        Ok(())
    }

    fn stats(&self) -> SinkStats {
        self.stats.snapshot()
    }
}

async fn run_worker(
    id: usize,
    mut rx: mpsc::Receiver<Command>,
    mut batcher: BulkBatcher,
    committer: Arc<Committer>,
) {
    debug!(worker = id, "bulk worker started");
    loop {
        let deadline = batcher.deadline();
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Index(unit)) => {
                    batcher.push(unit);
                    if batcher.is_full() {
                        committer.commit(id, batcher.drain()).await;
                    }
                }
                Some(Command::Flush(ack)) => {
                    if !batcher.is_empty() {
                        committer.commit(id, batcher.drain()).await;
                    }
                    let _ = ack.send(());
                }
                None => break,
            },
            _ = sleep_until(deadline) => {
                if batcher.should_flush() {
                    committer.commit(id, batcher.drain()).await;
                }
            }
        }
    }

    if !batcher.is_empty() {
        committer.commit(id, batcher.drain()).await;
    }
    debug!(worker = id, "bulk worker stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct Committer {
    client: ElasticClient,
    max_retries: u32,
    initial_backoff: Duration,
    stats: Arc<BulkStats>,
}

impl Committer {
    async fn commit(&self, worker: usize, batch: Vec<TransferUnit>) {
        let count = batch.len() as u64;
        let body = match encode_bulk(&batch) {
            Ok(body) => body,
            Err(e) => {
                self.stats.failed.fetch_add(count, Ordering::Relaxed);
                error!(worker, actions = count, error = %e, "failed to encode bulk request");
                return;
            }
        };
        self.stats.indexed.fetch_add(count, Ordering::Relaxed);

        match self.send_with_retry(body, batch.len()).await {
            Ok(outcome) => {
                self.stats.committed.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .succeeded
                    .fetch_add(outcome.succeeded, Ordering::Relaxed);
                self.stats.failed.fetch_add(outcome.failed, Ordering::Relaxed);
                if let Some((id, reason)) = &outcome.first_error {
                    warn!(
                        worker,
                        failed = outcome.failed,
                        first_id = %id,
                        reason = %reason,
                        "bulk items rejected"
                    );
                }
                debug!(worker, actions = count, succeeded = outcome.succeeded, "bulk committed");
            }
            Err(e) => {
                self.stats.failed.fetch_add(count, Ordering::Relaxed);
                error!(worker, actions = count, error = %e, "bulk request failed");
            }
        }
    }

    /// POST the body, retrying transport errors, 429 and 5xx with
    /// exponential backoff.
    async fn send_with_retry(&self, body: Bytes, expected: usize) -> Result<BulkOutcome, SinkError> {
        let url = self.client.endpoint(&["_bulk"]);
        let mut delay = self.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            let request = self
                .client
                .request(Method::POST, url.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(body.clone());

            let error = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let bytes = response
                            .bytes()
                            .await
                            .map_err(|e| SinkError::Transport(e.to_string()))?;
                        return BulkOutcome::parse(&bytes, expected);
                    }
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<unreadable body>".to_string());
                    let error = SinkError::Status {
                        status: status.as_u16(),
                        body,
                    };
                    if !is_retryable(status) {
                        return Err(error);
                    }
                    error
                }
                Err(e) => SinkError::Transport(e.to_string()),
            };

            if attempt >= self.max_retries {
                return Err(error);
            }
            attempt += 1;
            warn!(
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "bulk request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_BACKOFF);
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
