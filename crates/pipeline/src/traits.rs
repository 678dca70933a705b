//! Seams to the collaborators around the pipeline.
//!
//! The pipeline only depends on these traits; the Elasticsearch crate
//! implements them with reqwest, and tests implement them in memory.

use async_trait::async_trait;
use serde::Serialize;

use esrollup_core::{SinkError, SourceDocument, SourceError, TransferUnit};

use crate::coordinator::ProgressReport;

/// Cluster the rollup reads from.
#[async_trait]
pub trait ScrollSource: Send + Sync {
    /// Every index name on the cluster, unfiltered.
    async fn index_names(&self) -> Result<Vec<String>, SourceError>;

    /// Open a paging cursor over `index` returning `page_size` documents per page.
    async fn open_cursor(
        &self,
        index: &str,
        page_size: usize,
    ) -> Result<Box<dyn IndexCursor>, SourceError>;
}

/// Stateful paging handle over one source index.
#[async_trait]
pub trait IndexCursor: Send {
    /// Fetch the next page. `Ok(None)` signals end of data.
    async fn next_page(&mut self) -> Result<Option<Vec<SourceDocument>>, SourceError>;

    /// Release server-side cursor state. Best effort.
    async fn close(&mut self) {}
}

/// Counters exposed by a sink. Monotonically increasing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// Units accepted by `submit`.
    pub submitted: u64,
    /// Units sent to the cluster in a bulk request.
    pub indexed: u64,
    /// Units the cluster acknowledged.
    pub succeeded: u64,
    /// Units rejected by the cluster or lost to a failed request.
    pub failed: u64,
    /// Bulk requests committed.
    pub committed: u64,
    /// Explicit flushes performed.
    pub flushed: u64,
}

/// Batching writer for the destination cluster.
#[async_trait]
pub trait BulkSink: Send + Sync {
    /// Queue `unit` for writing. May wait while the sink is saturated.
    async fn submit(&self, unit: TransferUnit) -> Result<(), SinkError>;

    /// Commit everything buffered so far and wait for it.
    async fn flush(&self) -> Result<(), SinkError>;

    /// Flush and release the sink's resources.
    async fn close(&self) -> Result<(), SinkError>;

    /// Current counters, without waiting on in-flight work.
    fn stats(&self) -> SinkStats;
}

/// Presentation of pipeline progress. No feedback into the pipeline.
pub trait ProgressRenderer: Send {
    fn render(&mut self, report: &ProgressReport);
}

/// Renderer that draws nothing.
pub struct SilentRenderer;

impl ProgressRenderer for SilentRenderer {
    fn render(&mut self, _report: &ProgressReport) {}
}
