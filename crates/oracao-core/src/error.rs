use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request to {url} timed out after {elapsed:?}")]
    Timeout { url: String, elapsed: Duration },

    #[error("Unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Cache storage error: {0}")]
    Storage(String),

    #[error("Invalid cache name: {0}")]
    InvalidCacheName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_BODY_LENGTH: usize = 200;

impl WorkerError {
    /// Truncate a body preview to avoid logging excessive data
    pub fn truncate_body(body: &[u8]) -> String {
        let text = String::from_utf8_lossy(body);
        if text.len() <= MAX_ERROR_BODY_LENGTH {
            text.into_owned()
        } else {
            let cut: String = text.chars().take(MAX_ERROR_BODY_LENGTH).collect();
            format!("{}... (truncated, {} total bytes)", cut, body.len())
        }
    }

    /// True for failures that mean "the network could not answer", as opposed
    /// to an answer we did not like.
    pub fn is_offline(&self) -> bool {
        matches!(self, WorkerError::Network(_) | WorkerError::Timeout { .. })
    }
}
