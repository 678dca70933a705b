//! The concurrent rollup pipeline.
//!
//! One [`IndexReader`] task per matched source index streams documents
//! through a zero-capacity [`handoff`] to the [`Coordinator`], which forwards
//! them to a [`BulkSink`]. Readers are admitted in ticket order by the
//! [`AdmissionGate`] and report progress into the [`ProgressLedger`].

pub mod admission;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod handoff;
pub mod ledger;
pub mod reader;
pub mod traits;

pub use admission::{AdmissionGate, AdmissionSlot};
pub use coordinator::{Coordinator, IndexProgress, PipelineConfig, ProgressReport, RollupSummary};
pub use discovery::IndexMatcher;
pub use error::{PipelineError, ReaderError, ReaderFailure};
pub use ledger::ProgressLedger;
pub use reader::{IndexReader, ReaderState};
pub use traits::{
    BulkSink, IndexCursor, ProgressRenderer, ScrollSource, SilentRenderer, SinkStats,
};
