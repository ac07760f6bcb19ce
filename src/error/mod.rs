//! Error handling module for the capture proxy

use thiserror::Error;

/// Custom error type for the capture proxy
#[derive(Error, Debug)]
pub enum Error {
    /// An upstream proxy value, scope pattern or settings file could not be used.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Capture storage or traffic modifier could not be created.
    #[error("Resource acquisition error: {0}")]
    ResourceAcquisition(String),

    #[error("Listener error: {0}")]
    Listener(String),

    /// Listener shutdown or storage release failed; teardown is incomplete.
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("Invalid server state: {0}")]
    InvalidState(String),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("HTTP message error: {0}")]
    HttpMessage(#[from] hyper::http::Error),

    #[error("Upstream request error: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for the capture proxy
pub type Result<T> = std::result::Result<T, Error>;
