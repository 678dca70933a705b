//! Bulk indexing into the destination cluster.
//!
//! ```text
//! submit ──► worker queue (bounded) ──► BulkBatcher ──► POST /_bulk
//!             round-robin over N           size / interval    retry + backoff
//! ```

mod batcher;
mod processor;
mod request;

pub use batcher::BulkBatcher;
pub use processor::{BulkConfig, BulkProcessor, BulkStats};
pub use request::{encode_bulk, BulkOutcome};
