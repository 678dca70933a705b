use thiserror::Error;

/// Errors raised while setting up a cluster connection.
#[derive(Debug, Error)]
pub enum ElasticError {
    #[error("invalid cluster url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
