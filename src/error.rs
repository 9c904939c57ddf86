//! Error types for the radar components.

use thiserror::Error;

/// Errors raised by the fetcher, notifier, history store and config loader.
#[derive(Error, Debug)]
pub enum RadarError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Feed retrieval or parsing error.
    #[error("feed error: {0}")]
    Feed(String),

    /// Transport-level HTTP failure (connect, timeout, status).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The webhook answered with a non-zero error code.
    #[error("webhook rejected message: errcode={code}, errmsg={message}")]
    Rejected { code: i64, message: String },

    /// The webhook answered with something that is not an acknowledgement.
    #[error("malformed webhook response: {0}")]
    MalformedResponse(String),

    /// History file could not be encoded or decoded.
    #[error("state error: {0}")]
    State(String),
}

impl From<reqwest::Error> for RadarError {
    fn from(e: reqwest::Error) -> Self {
        RadarError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for RadarError {
    fn from(e: serde_json::Error) -> Self {
        RadarError::State(e.to_string())
    }
}

/// Result type alias for radar operations.
pub type Result<T> = std::result::Result<T, RadarError>;
