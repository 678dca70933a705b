//! Elasticsearch implementations of the pipeline's source and sink.
//!
//! [`ElasticClient`] lists indexes and opens scroll cursors on the source
//! cluster. [`BulkProcessor`] batches transfer units into `_bulk` requests
//! against the destination cluster.

pub mod bulk;
pub mod client;
pub mod error;
pub mod scroll;

pub use bulk::{BulkConfig, BulkProcessor};
pub use client::ElasticClient;
pub use error::ElasticError;
pub use scroll::ElasticCursor;
