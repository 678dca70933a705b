//! Accumulates transfer units into bulk batches.

use std::time::Duration;

use tokio::time::Instant;

use esrollup_core::TransferUnit;

/// Collects units until `max_actions` is reached or `max_wait` has elapsed
/// since the first unit of the batch, whichever comes first.
///
/// Without a `max_wait` only the size threshold (or an explicit drain)
/// commits a batch.
pub struct BulkBatcher {
    buffer: Vec<TransferUnit>,
    max_actions: usize,
    max_wait: Option<Duration>,
    batch_started: Option<Instant>,
}

impl BulkBatcher {
    pub fn new(max_actions: usize, max_wait: Option<Duration>) -> Self {
        let max_actions = max_actions.max(1);
        Self {
            buffer: Vec::with_capacity(max_actions.min(10_000)),
            max_actions,
            max_wait,
            batch_started: None,
        }
    }

    pub fn push(&mut self, unit: TransferUnit) {
        if self.batch_started.is_none() {
            self.batch_started = Some(Instant::now());
        }
        self.buffer.push(unit);
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.max_actions
    }

    /// When the current batch is due by time, if it ever is.
    pub fn deadline(&self) -> Option<Instant> {
        match (self.batch_started, self.max_wait) {
            (Some(started), Some(wait)) => Some(started + wait),
            _ => None,
        }
    }

    pub fn should_flush(&self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        self.is_full() || self.deadline().is_some_and(|d| Instant::now() >= d)
    }

    /// Take the buffered batch, resetting the timer.
    pub fn drain(&mut self) -> Vec<TransferUnit> {
        self.batch_started = None;
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.max_actions.min(10_000)))
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
