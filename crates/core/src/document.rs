use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One matched source index, scheduled for rollup into `dest_name`.
///
/// `ticket` is the 1-based position of the source in the sorted list of
/// matched indexes. Readers are admitted strictly in ticket order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexTask {
    pub source_name: String,
    pub dest_name: String,
    pub ticket: u64,
}

/// Progress of one source index, keyed by source name in the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub destination_name: String,
    /// Documents read so far. Exact once `done` is set.
    pub read_count: u64,
    pub done: bool,
    /// Set together with `done` when the reader stopped on a fetch error.
    pub failed: bool,
}

impl ProgressRecord {
    pub fn new(destination_name: impl Into<String>) -> Self {
        Self {
            destination_name: destination_name.into(),
            ..Self::default()
        }
    }
}

/// A raw document as returned by a source cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub index: String,
    /// Mapping type. Empty for clusters without mapping types.
    pub doc_type: String,
    pub id: String,
    /// The `_source` body, verbatim JSON.
    pub source: Bytes,
}

/// One document in flight from a source index to its destination index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferUnit {
    pub destination_name: String,
    pub document_type: String,
    pub document_id: String,
    pub payload: Bytes,
}

impl TransferUnit {
    /// Address `doc` for writing into `destination_name`.
    pub fn new(destination_name: impl Into<String>, doc: SourceDocument) -> Self {
        Self {
            destination_name: destination_name.into(),
            document_type: doc.doc_type,
            document_id: doc.id,
            payload: doc.source,
        }
    }
}
