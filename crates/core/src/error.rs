use thiserror::Error;

/// Invalid run configuration. Surfaced before any reader starts; fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("input filter (infilter) cannot be blank")]
    BlankFilter,

    #[error("input filter could not be compiled to a regex: {0}")]
    InvalidFilter(String),

    #[error("{0} cannot be blank")]
    BlankPattern(&'static str),

    #[error("{name} is not a valid date layout: {layout}")]
    InvalidPattern { name: &'static str, layout: String },

    #[error("{0} cannot be blank")]
    BlankHost(&'static str),

    #[error("thread count (threads) must be above zero")]
    ZeroThreads,

    #[error("buffer size (buffersize) must be above zero")]
    ZeroBufferSize,
}

/// Failure while reading a source index.
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} returned {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("scroll context for {index} expired")]
    ScrollExpired { index: String },

    #[error("{0}")]
    Other(String),
}

/// Failure while writing to the destination cluster.
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("bulk request failed: {0}")]
    Transport(String),

    #[error("bulk request returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed bulk response: {0}")]
    Malformed(String),

    #[error("bulk sink is closed")]
    Closed,
}
