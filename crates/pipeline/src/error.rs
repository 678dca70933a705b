use thiserror::Error;

use esrollup_core::{ConfigError, SinkError, SourceError};

/// Errors that stop a whole rollup run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("index discovery failed: {0}")]
    Discovery(SourceError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Why a single reader stopped early. Never aborts the run.
#[derive(Debug, Clone, Error)]
pub enum ReaderError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] SourceError),

    #[error("coordinator stopped receiving")]
    HandoffClosed,

    #[error("reader task ended abnormally: {0}")]
    Panicked(String),
}

/// A reader that ended in the failed state.
#[derive(Debug, Clone)]
pub struct ReaderFailure {
    pub source: String,
    /// Documents emitted before the failure.
    pub read: u64,
    pub error: ReaderError,
}
