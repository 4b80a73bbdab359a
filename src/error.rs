// Error types for the response cache.
// Separates caller mistakes, construction failures, transport failures, and on-disk corruption.

use std::path::PathBuf;

use thiserror::Error;

use crate::http::TransportError;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache directory {path}: {reason}")]
    Configuration { path: PathBuf, reason: String },

    #[error("Failed to initialize HTTP transport: {0}")]
    TransportInit(#[source] TransportError),

    #[error("Request to {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("Unknown post-processor: {0}")]
    UnknownPostProcessor(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Corrupt cache entry {path}: {reason}")]
    CorruptEntry { path: PathBuf, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub(crate) fn configuration(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CorruptEntry {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error is a programming mistake on the caller's side.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownPostProcessor(_) | Self::InvalidRequest(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_keeps_transport_source() {
        let err = CacheError::Fetch {
            url: "https://api.example.test/users".to_string(),
            source: TransportError::Other("connection refused".to_string()),
        };

        assert!(err.to_string().contains("api.example.test"));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection refused");
    }

    #[test]
    fn test_caller_errors() {
        assert!(CacheError::UnknownPostProcessor("json".into()).is_caller_error());
        assert!(CacheError::InvalidRequest("empty method".into()).is_caller_error());
        assert!(!CacheError::configuration("/tmp/x", "not a directory").is_caller_error());
    }
}
