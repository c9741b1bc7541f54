use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid subscription: {0}")]
    InvalidSubscription(&'static str),
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
    #[error("malformed relay message: {0}")]
    Protocol(String),
    #[error("relay rejected event: {message}")]
    Rejected { message: String },
    #[error("operation timed out")]
    Timeout,
    #[error("relay client disposed")]
    Disposed,
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("serde json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
