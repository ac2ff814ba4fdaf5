//! Error taxonomy for the ingest pipeline.
//!
//! Every variant is recoverable: row and record errors are contained at their
//! layer, network errors fall back to the cached snapshot.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeedError>;

#[derive(Error, Debug)]
pub enum FeedError {
    /// Upstream unreachable, timed out, or answered with a non-2xx status.
    #[error("network error: {0}")]
    Network(String),

    /// A table row could not be turned into fields.
    #[error("parse error: {0}")]
    Parse(String),

    /// A record is incomplete (missing date, magnitude or epicenter).
    #[error("validation error: {0}")]
    Validation(String),

    /// A single record could not be written to or read from the store.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        FeedError::Network(e.to_string())
    }
}

impl From<std::io::Error> for FeedError {
    fn from(e: std::io::Error) -> Self {
        FeedError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Persistence(e.to_string())
    }
}
