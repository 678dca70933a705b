//! Integration tests for the rollup pipeline.
//!
//! Runs the coordinator against an in-memory source whose cursors record
//! when they open and close, and an in-memory sink that keeps every unit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use tokio::time::timeout;

use esrollup_core::{IndexTask, SinkError, SourceDocument, SourceError, TransferUnit};
use esrollup_pipeline::{
    BulkSink, Coordinator, IndexCursor, IndexMatcher, PipelineConfig, PipelineError,
    ProgressRenderer, ProgressReport, ReaderState, ScrollSource, SinkStats,
};

const TIMEOUT: Duration = Duration::from_secs(20);

// ── In-memory source ────────────────────────────────────────────────

#[derive(Clone, Copy)]
struct FakeIndex {
    docs: usize,
    fail_after: Option<usize>,
}

/// Open/close bookkeeping shared between a source and its cursors.
#[derive(Default)]
struct Tracker {
    /// "open:<index>" / "close:<index>" in the order they happened.
    events: Mutex<Vec<String>>,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
}

#[derive(Default)]
struct FakeSource {
    indexes: HashMap<String, FakeIndex>,
    extra_names: Vec<String>,
    fail_listing: bool,
    page_delay: Duration,
    tracker: Arc<Tracker>,
}

impl FakeSource {
    fn with(indexes: &[(&str, usize)]) -> Self {
        Self {
            indexes: indexes
                .iter()
                .map(|(name, docs)| {
                    (
                        name.to_string(),
                        FakeIndex {
                            docs: *docs,
                            fail_after: None,
                        },
                    )
                })
                .collect(),
            page_delay: Duration::from_millis(1),
            ..Self::default()
        }
    }

    fn failing(mut self, name: &str, after: usize) -> Self {
        if let Some(index) = self.indexes.get_mut(name) {
            index.fail_after = Some(after);
        }
        self
    }

    fn events(&self) -> Vec<String> {
        self.tracker.events.lock().unwrap().clone()
    }

    fn opened(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("open:").map(str::to_string))
            .collect()
    }

    fn open_now(&self) -> usize {
        self.tracker.open_now.load(Ordering::SeqCst)
    }

    fn max_open(&self) -> usize {
        self.tracker.max_open.load(Ordering::SeqCst)
    }
}

struct FakeCursor {
    tracker: Arc<Tracker>,
    name: String,
    index: FakeIndex,
    page_size: usize,
    page_delay: Duration,
    position: usize,
}

#[async_trait]
impl ScrollSource for FakeSource {
    async fn index_names(&self) -> Result<Vec<String>, SourceError> {
        if self.fail_listing {
            return Err(SourceError::Other("listing refused".to_string()));
        }
        let mut names: Vec<String> = self.indexes.keys().cloned().collect();
        names.extend(self.extra_names.iter().cloned());
        Ok(names)
    }

    async fn open_cursor(
        &self,
        index: &str,
        page_size: usize,
    ) -> Result<Box<dyn IndexCursor>, SourceError> {
        let Some(found) = self.indexes.get(index).copied() else {
            return Err(SourceError::Other(format!("no such index {index}")));
        };
        self.tracker.events.lock().unwrap().push(format!("open:{index}"));
        let now = self.tracker.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.tracker.max_open.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(FakeCursor {
            tracker: Arc::clone(&self.tracker),
            name: index.to_string(),
            index: found,
            page_size,
            page_delay: self.page_delay,
            position: 0,
        }))
    }
}

#[async_trait]
impl IndexCursor for FakeCursor {
    async fn next_page(&mut self) -> Result<Option<Vec<SourceDocument>>, SourceError> {
        tokio::time::sleep(self.page_delay).await;

        let mut end = self.index.docs;
        if let Some(fail_after) = self.index.fail_after {
            if self.position >= fail_after {
                return Err(SourceError::Other("shard went away".to_string()));
            }
            end = end.min(fail_after);
        }
        if self.position >= end {
            return Ok(None);
        }

        let upto = (self.position + self.page_size).min(end);
        let page = (self.position..upto)
            .map(|i| SourceDocument {
                index: self.name.clone(),
                doc_type: "event".to_string(),
                id: format!("{}-{i}", self.name),
                source: Bytes::from(format!(r#"{{"n":{i}}}"#)),
            })
            .collect();
        self.position = upto;
        Ok(Some(page))
    }

    async fn close(&mut self) {
        self.tracker.open_now.fetch_sub(1, Ordering::SeqCst);
        self.tracker
            .events
            .lock()
            .unwrap()
            .push(format!("close:{}", self.name));
    }
}

// ── In-memory sink ──────────────────────────────────────────────────

#[derive(Default)]
struct MemorySink {
    units: Mutex<Vec<TransferUnit>>,
    /// Units whose document id starts with this are refused.
    refuse_prefix: Option<String>,
    refused: AtomicUsize,
    flushed: AtomicUsize,
    closed: AtomicUsize,
}

impl MemorySink {
    fn refusing(prefix: &str) -> Self {
        Self {
            refuse_prefix: Some(prefix.to_string()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl BulkSink for MemorySink {
    async fn submit(&self, unit: TransferUnit) -> Result<(), SinkError> {
        if self.closed.load(Ordering::SeqCst) > 0 {
            return Err(SinkError::Closed);
        }
        if let Some(prefix) = &self.refuse_prefix {
            if unit.document_id.starts_with(prefix.as_str()) {
                self.refused.fetch_add(1, Ordering::SeqCst);
                return Err(SinkError::Status {
                    status: 400,
                    body: "mapper_parsing_exception".to_string(),
                });
            }
        }
        self.units.lock().unwrap().push(unit);
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.flushed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stats(&self) -> SinkStats {
        let n = self.units.lock().unwrap().len() as u64;
        SinkStats {
            submitted: n,
            indexed: n,
            succeeded: n,
            ..SinkStats::default()
        }
    }
}

// ── Capturing renderer ──────────────────────────────────────────────

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<ProgressReport>>>);

impl Captured {
    fn last(&self) -> ProgressReport {
        self.0.lock().unwrap().last().cloned().expect("no progress rendered")
    }
}

impl ProgressRenderer for Captured {
    fn render(&mut self, report: &ProgressReport) {
        self.0.lock().unwrap().push(report.clone());
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn fast_config(threads: usize, page_size: usize) -> PipelineConfig {
    PipelineConfig {
        threads,
        page_size,
        count_update: 100,
        admission_poll: Duration::from_millis(2),
        progress_interval: Duration::from_millis(20),
    }
}

fn tasks(names: &[&str]) -> Vec<IndexTask> {
    names
        .iter()
        .zip(1u64..)
        .map(|(name, ticket)| IndexTask {
            source_name: name.to_string(),
            dest_name: "rollup".to_string(),
            ticket,
        })
        .collect()
}

fn coordinator(
    source: &Arc<FakeSource>,
    sink: &Arc<MemorySink>,
    captured: &Captured,
    config: PipelineConfig,
) -> Coordinator {
    Coordinator::new(
        Arc::clone(source) as Arc<dyn ScrollSource>,
        Arc::clone(sink) as Arc<dyn BulkSink>,
        Box::new(captured.clone()),
        config,
    )
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_index_set_completes_without_waiting() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(MemorySink::default());
    let captured = Captured::default();
    let mut config = fast_config(2, 10);
    config.progress_interval = Duration::from_secs(30);

    let summary = timeout(
        Duration::from_secs(5),
        coordinator(&source, &sink, &captured, config).run(Vec::new()),
    )
    .await
    .expect("coordinator hung on an empty index set")
    .unwrap();

    assert_eq!(summary.received, 0);
    assert_eq!(summary.indexes, 0);
    assert_eq!(sink.flushed.load(Ordering::SeqCst), 1);
    assert_eq!(sink.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_document_reaches_the_sink_and_counts_are_exact() {
    let source = Arc::new(FakeSource::with(&[("a", 250), ("b", 0), ("c", 1234)]));
    let sink = Arc::new(MemorySink::default());
    let captured = Captured::default();

    let summary = timeout(
        TIMEOUT,
        coordinator(&source, &sink, &captured, fast_config(2, 100)).run(tasks(&["a", "b", "c"])),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.received, 1484);
    assert!(!summary.is_partial());
    assert_eq!(sink.units.lock().unwrap().len(), 1484);

    let report = captured.last();
    let counts: Vec<_> = report
        .indexes
        .iter()
        .map(|p| {
            let record = p.record.as_ref().expect("index never registered");
            assert!(record.done);
            assert!(!record.failed);
            (p.source.as_str(), record.read_count)
        })
        .collect();
    assert_eq!(counts, vec![("a", 250), ("b", 0), ("c", 1234)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_thread_reads_indexes_strictly_in_sequence() {
    let source = Arc::new(FakeSource::with(&[("a", 120), ("b", 30), ("c", 75)]));
    let sink = Arc::new(MemorySink::default());
    let captured = Captured::default();

    timeout(
        TIMEOUT,
        coordinator(&source, &sink, &captured, fast_config(1, 25)).run(tasks(&["a", "b", "c"])),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(
        source.events(),
        vec!["open:a", "close:a", "open:b", "close:b", "open:c", "close:c"]
    );
    assert_eq!(source.max_open(), 1);

    // Documents of one index arrive in cursor order.
    let units = sink.units.lock().unwrap();
    let a_ids: Vec<_> = units
        .iter()
        .filter(|u| u.document_id.starts_with("a-"))
        .map(|u| u.document_id.clone())
        .collect();
    let expected: Vec<_> = (0..120).map(|i| format!("a-{i}")).collect();
    assert_eq!(a_ids, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_thread_limit() {
    let names = ["i1", "i2", "i3", "i4", "i5", "i6"];
    let source = Arc::new(FakeSource::with(
        &names.iter().map(|n| (*n, 300usize)).collect::<Vec<_>>(),
    ));
    let sink = Arc::new(MemorySink::default());
    let captured = Captured::default();

    let summary = timeout(
        TIMEOUT,
        coordinator(&source, &sink, &captured, fast_config(2, 20)).run(tasks(&names)),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.received, 1800);
    assert!(source.max_open() <= 2);
    assert_eq!(source.opened().len(), 6);
    for report in captured.0.lock().unwrap().iter() {
        assert!(report.running <= 2, "running={} over limit", report.running);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn later_ticket_starts_while_a_large_earlier_index_still_reads() {
    let source = Arc::new(FakeSource::with(&[("a", 2000), ("b", 5), ("c", 5), ("d", 5)]));
    let sink = Arc::new(MemorySink::default());
    let captured = Captured::default();

    let summary = timeout(
        TIMEOUT,
        coordinator(&source, &sink, &captured, fast_config(2, 10))
            .run(tasks(&["a", "b", "c", "d"])),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.received, 2015);
    assert!(source.max_open() <= 2);

    // a and b are admitted together; after that each small index frees the
    // slot for the next ticket while a keeps reading.
    let opened = source.opened();
    let mut first_two = opened[..2].to_vec();
    first_two.sort();
    assert_eq!(first_two, vec!["a", "b"]);
    assert_eq!(opened[2..], ["c", "d"]);

    let events = source.events();
    let at = |event: &str| events.iter().position(|e| e == event).unwrap();
    assert!(at("close:b") < at("open:c"));
    assert!(at("close:c") < at("open:d"));
    assert!(at("open:d") < at("close:a"), "events: {events:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tickets_are_renumbered_from_source_order() {
    let source = Arc::new(FakeSource::with(&[("a", 20), ("b", 30), ("c", 40)]));
    let sink = Arc::new(MemorySink::default());
    let captured = Captured::default();

    // Unsorted, starting at 2, with a gap.
    let input = vec![
        IndexTask {
            source_name: "c".to_string(),
            dest_name: "rollup".to_string(),
            ticket: 9,
        },
        IndexTask {
            source_name: "a".to_string(),
            dest_name: "rollup".to_string(),
            ticket: 2,
        },
        IndexTask {
            source_name: "b".to_string(),
            dest_name: "rollup".to_string(),
            ticket: 3,
        },
    ];

    let summary = timeout(
        Duration::from_secs(5),
        coordinator(&source, &sink, &captured, fast_config(1, 10)).run(input),
    )
    .await
    .expect("coordinator hung on tickets not starting at 1")
    .unwrap();

    assert_eq!(summary.received, 90);
    assert_eq!(source.opened(), vec!["a", "b", "c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_source_is_read_once() {
    let source = Arc::new(FakeSource::with(&[("a", 20), ("b", 30)]));
    let sink = Arc::new(MemorySink::default());
    let captured = Captured::default();

    let summary = timeout(
        Duration::from_secs(5),
        coordinator(&source, &sink, &captured, fast_config(2, 10)).run(tasks(&["a", "b", "a"])),
    )
    .await
    .expect("coordinator hung on a repeated source")
    .unwrap();

    assert_eq!(summary.indexes, 2);
    assert_eq!(summary.received, 50);
    let mut opened = source.opened();
    opened.sort();
    assert_eq!(opened, vec!["a", "b"]);
    assert_eq!(sink.units.lock().unwrap().len(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refused_units_are_counted_and_the_sink_still_closes() {
    let source = Arc::new(FakeSource::with(&[("a", 40), ("b", 60)]));
    let sink = Arc::new(MemorySink::refusing("b-"));
    let captured = Captured::default();

    let summary = timeout(
        TIMEOUT,
        coordinator(&source, &sink, &captured, fast_config(2, 10)).run(tasks(&["a", "b"])),
    )
    .await
    .expect("run did not complete after the sink refused units")
    .unwrap();

    assert_eq!(summary.received, 100);
    assert_eq!(summary.rejected, 60);
    assert_eq!(sink.refused.load(Ordering::SeqCst), 60);
    assert!(summary.is_partial());
    assert!(summary.failed.is_empty());
    assert_eq!(sink.units.lock().unwrap().len(), 40);
    assert_eq!(sink.flushed.load(Ordering::SeqCst), 1);
    assert_eq!(sink.closed.load(Ordering::SeqCst), 1);

    // Readers are unaffected by the sink.
    let report = captured.last();
    assert!(report.indexes.iter().all(|p| p.state() == ReaderState::Done));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_reader_is_done_with_partial_count() {
    let source = Arc::new(
        FakeSource::with(&[("a", 100), ("broken", 400), ("c", 100)]).failing("broken", 250),
    );
    let sink = Arc::new(MemorySink::default());
    let captured = Captured::default();

    let summary = timeout(
        TIMEOUT,
        coordinator(&source, &sink, &captured, fast_config(2, 50))
            .run(tasks(&["a", "broken", "c"])),
    )
    .await
    .expect("run did not complete after a reader failure")
    .unwrap();

    assert_eq!(summary.received, 450);
    assert!(summary.is_partial());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].source, "broken");
    assert_eq!(summary.failed[0].read, 250);

    let report = captured.last();
    let broken = report
        .indexes
        .iter()
        .find(|p| p.source == "broken")
        .and_then(|p| p.record.clone())
        .unwrap();
    assert_eq!(broken.read_count, 250);
    assert!(broken.done);
    assert!(broken.failed);

    let states: Vec<_> = report.indexes.iter().map(|p| p.state()).collect();
    assert_eq!(
        states,
        vec![ReaderState::Done, ReaderState::Failed, ReaderState::Done]
    );

    // The failed reader gave its slot back and closed its cursor.
    assert_eq!(source.open_now(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_index_fails_only_that_reader() {
    let source = Arc::new(FakeSource::with(&[("a", 10)]));
    let sink = Arc::new(MemorySink::default());
    let captured = Captured::default();

    let summary = timeout(
        TIMEOUT,
        coordinator(&source, &sink, &captured, fast_config(1, 5)).run(tasks(&["a", "gone"])),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.received, 10);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].source, "gone");
    assert_eq!(summary.failed[0].read, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rollup_discovers_and_matches_indexes() {
    let mut fake = FakeSource::with(&[("logs-2016.01.01", 5), ("logs-2016.01.02", 7)]);
    fake.extra_names = vec![".kibana".to_string(), "logs-latest".to_string()];
    let source = Arc::new(fake);
    let sink = Arc::new(MemorySink::default());
    let captured = Captured::default();
    let matcher = IndexMatcher::new(Regex::new(r"^logs-").unwrap(), "logs-%Y.%m.%d", "logs-%Y.%m");

    let summary = timeout(
        TIMEOUT,
        coordinator(&source, &sink, &captured, fast_config(3, 10)).rollup(&matcher),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.indexes, 2);
    assert_eq!(summary.received, 12);
    let units = sink.units.lock().unwrap();
    assert!(units.iter().all(|u| u.destination_name == "logs-2016.01"));
}

#[tokio::test]
async fn discovery_failure_aborts_before_reading() {
    let source = Arc::new(FakeSource {
        fail_listing: true,
        ..FakeSource::default()
    });
    let sink = Arc::new(MemorySink::default());
    let captured = Captured::default();
    let matcher = IndexMatcher::new(Regex::new(".*").unwrap(), "%Y", "%Y");

    let err = coordinator(&source, &sink, &captured, fast_config(1, 10))
        .rollup(&matcher)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Discovery(_)));
    assert_eq!(sink.closed.load(Ordering::SeqCst), 0);
}
