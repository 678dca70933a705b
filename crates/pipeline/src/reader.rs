//! Per-index reader task.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use esrollup_core::{IndexTask, ProgressRecord, SourceDocument, TransferUnit};

use crate::admission::AdmissionGate;
use crate::error::{ReaderError, ReaderFailure};
use crate::handoff::HandoffSender;
use crate::ledger::ProgressLedger;
use crate::traits::ScrollSource;

/// Lifecycle of a reader. `Done` and `Failed` are terminal.
///
/// The ledger is the only place a reader publishes its progress, so the
/// state is read back from the reader's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    WaitingForAdmission,
    Reading,
    Done,
    Failed,
}

impl ReaderState {
    /// State of a reader whose ledger record is `record`. A reader only
    /// creates its record once admitted.
    pub fn of(record: Option<&ProgressRecord>) -> Self {
        match record {
            None => Self::WaitingForAdmission,
            Some(r) if r.done && r.failed => Self::Failed,
            Some(r) if r.done => Self::Done,
            Some(_) => Self::Reading,
        }
    }
}

/// Streams every document of one source index into the handoff.
pub struct IndexReader {
    task: IndexTask,
    source: Arc<dyn ScrollSource>,
    gate: Arc<AdmissionGate>,
    ledger: Arc<ProgressLedger>,
    handoff: HandoffSender,
    page_size: usize,
    count_update: u64,
    admission_poll: Duration,
}

impl IndexReader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task: IndexTask,
        source: Arc<dyn ScrollSource>,
        gate: Arc<AdmissionGate>,
        ledger: Arc<ProgressLedger>,
        handoff: HandoffSender,
        page_size: usize,
        count_update: u64,
        admission_poll: Duration,
    ) -> Self {
        Self {
            task,
            source,
            gate,
            ledger,
            handoff,
            page_size: page_size.max(1),
            count_update: count_update.max(1),
            admission_poll,
        }
    }

    /// Wait for admission, then read the index to the end.
    ///
    /// Returns the number of documents emitted. On failure the ledger record
    /// is still finished (as failed) so the run can complete.
    pub async fn run(self) -> Result<u64, ReaderFailure> {
        let slot = self
            .gate
            .admit(self.task.ticket, self.admission_poll)
            .await;

        self.ledger
            .create(&self.task.source_name, &self.task.dest_name);
        info!(
            source = %self.task.source_name,
            dest = %self.task.dest_name,
            ticket = self.task.ticket,
            "reader admitted"
        );

        let mut emitted: u64 = 0;
        let result = self.read_all(&mut emitted).await;

        let outcome = match result {
            Ok(()) => {
                self.ledger.mark_done(&self.task.source_name, emitted);
                info!(source = %self.task.source_name, read = emitted, "reader done");
                Ok(emitted)
            }
            Err(error) => {
                self.ledger.mark_failed(&self.task.source_name, emitted);
                warn!(
                    source = %self.task.source_name,
                    read = emitted,
                    error = %error,
                    "reader failed"
                );
                Err(ReaderFailure {
                    source: self.task.source_name.clone(),
                    read: emitted,
                    error,
                })
            }
        };

        drop(slot);
        outcome
    }

    async fn read_all(&self, emitted: &mut u64) -> Result<(), ReaderError> {
        let mut cursor = self
            .source
            .open_cursor(&self.task.source_name, self.page_size)
            .await?;

        let result = loop {
            let page = match cursor.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break Ok(()),
                Err(e) => break Err(ReaderError::Fetch(e)),
            };
            debug!(source = %self.task.source_name, docs = page.len(), "page fetched");

            if let Err(e) = self.emit_page(page, emitted).await {
                break Err(e);
            }
        };

        cursor.close().await;
        result
    }

    async fn emit_page(
        &self,
        page: Vec<SourceDocument>,
        emitted: &mut u64,
    ) -> Result<(), ReaderError> {
        for doc in page {
            let unit = TransferUnit::new(self.task.dest_name.clone(), doc);
            self.handoff
                .send(unit)
                .await
                .map_err(|_| ReaderError::HandoffClosed)?;
            *emitted += 1;

            if *emitted % self.count_update == 0 {
                self.ledger
                    .increment_read(&self.task.source_name, self.count_update);
            }
        }
        Ok(())
    }
}
