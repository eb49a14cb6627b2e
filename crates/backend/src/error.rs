//! Error types for content sources
//!
//! Every failure a source can hit is kept distinct here so it can be logged,
//! even though route resolution treats all of them as "not found".

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Error type for content source reads
#[derive(Debug, Error)]
pub enum BackendError {
    /// Local I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Target exists but is not a regular file
    #[error("not a regular file: {}", .0.display())]
    NotRegular(PathBuf),

    /// Target was older than its refresh marker allows and has been removed
    #[error("expired by refresh marker: {}", .0.display())]
    Expired(PathBuf),

    /// HTTP transport failure (connect, TLS, timeout, body)
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Origin answered with something other than 206 Partial Content
    #[error("unexpected http status {0}")]
    Status(StatusCode),

    /// Content-Range header absent or unparseable
    #[error("missing or invalid content-range header: {0:?}")]
    ContentRange(String),

    /// Origin returned a different range than the one requested
    #[error("invalid range returned: requested {requested}, got {returned}")]
    RangeMismatch { requested: String, returned: String },

    /// Body ended before the announced range was fully received
    #[error("short body: expected {expected} bytes, received {received}")]
    ShortBody { expected: u64, received: u64 },

    /// Command did not finish within its deadline and was killed
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// Command exited unsuccessfully
    #[error("command failed: {0}")]
    CommandFailed(ExitStatus),

    /// Exec target had no command in it
    #[error("empty command")]
    EmptyCommand,
}

/// Result type for content source reads
pub type Result<T> = std::result::Result<T, BackendError>;

/// A route or cache policy pattern that failed to compile
#[derive(Debug, Error)]
#[error("route {route}: invalid pattern {pattern:?}: {source}")]
pub struct PatternError {
    pub route: usize,
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackendError::NotRegular(PathBuf::from("/srv/boot"));
        assert_eq!(err.to_string(), "not a regular file: /srv/boot");

        let err = BackendError::ShortBody {
            expected: 2048,
            received: 1024,
        };
        assert!(err.to_string().contains("expected 2048"));

        let err = BackendError::Status(StatusCode::NOT_FOUND);
        assert!(err.to_string().contains("404"));
    }
}
