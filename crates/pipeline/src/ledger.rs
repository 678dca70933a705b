//! Per-index read progress shared between readers and the coordinator.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use esrollup_core::ProgressRecord;
use tracing::warn;

/// Map of source index name to [`ProgressRecord`], behind one lock.
///
/// Records are created lazily by a reader once it is admitted and are only
/// mutated by that reader. A record marked done is never changed again.
#[derive(Debug, Default)]
pub struct ProgressLedger {
    records: Mutex<BTreeMap<String, ProgressRecord>>,
}

impl ProgressLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ProgressRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh record for `source`.
    pub fn create(&self, source: &str, destination: &str) {
        self.lock()
            .insert(source.to_string(), ProgressRecord::new(destination));
    }

    /// Add `delta` documents to the running count of `source`.
    pub fn increment_read(&self, source: &str, delta: u64) {
        let mut records = self.lock();
        match records.get_mut(source) {
            Some(record) if !record.done => record.read_count += delta,
            Some(_) => warn!(source, delta, "increment on a finished record ignored"),
            None => warn!(source, delta, "increment on an unregistered index ignored"),
        }
    }

    /// Finish `source` with its exact total.
    pub fn mark_done(&self, source: &str, final_count: u64) {
        self.finish(source, final_count, false);
    }

    /// Finish `source` after a fetch error; it still counts as done.
    pub fn mark_failed(&self, source: &str, final_count: u64) {
        self.finish(source, final_count, true);
    }

    fn finish(&self, source: &str, final_count: u64, failed: bool) {
        let mut records = self.lock();
        match records.get_mut(source) {
            Some(record) if !record.done => {
                record.read_count = final_count;
                record.done = true;
                record.failed = failed;
            }
            Some(_) => warn!(source, "record already finished"),
            None => warn!(source, final_count, "finish on an unregistered index ignored"),
        }
    }

    /// Copy of every record, ordered by source name.
    pub fn snapshot(&self) -> Vec<(String, ProgressRecord)> {
        self.lock()
            .iter()
            .map(|(source, record)| (source.clone(), record.clone()))
            .collect()
    }

    pub fn get(&self, source: &str) -> Option<ProgressRecord> {
        self.lock().get(source).cloned()
    }
}

/// True when `expected` records exist and all of them are done.
pub fn all_done(snapshot: &[(String, ProgressRecord)], expected: usize) -> bool {
    snapshot.len() >= expected && snapshot.iter().all(|(_, record)| record.done)
}
