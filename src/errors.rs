use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unexpected data from exchange: {0}")]
    UnexpectedData(String),

    #[error("Exchange rejected request: {0}")]
    Rejected(String),

    #[error("Capability not supported: {0}")]
    Unsupported(&'static str),
}

/// Failure of a refresh cycle outside the per-exchange fetch boundary.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh cycle did not complete: {0}")]
    Cycle(#[source] tokio::task::JoinError),
}
