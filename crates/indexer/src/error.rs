//! Error types for the indexer.
//!
//! Errors are split by category: transport failures reaching the cluster,
//! scroll cursor misuse, configuration problems, bulk processor lifecycle
//! errors and mapper failures. Per-document failures inside a bulk response
//! are *not* errors; they are reported as [`DocumentStatus`] values in a
//! [`BatchOutcome`].
//!
//! [`DocumentStatus`]: crate::types::DocumentStatus
//! [`BatchOutcome`]: crate::types::BatchOutcome

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// The primary error type for all indexer operations.
#[derive(Error, Debug)]
pub enum IndexerError {
    /// The cluster could not be reached or refused the whole request.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Scroll cursor errors
    #[error(transparent)]
    Cursor(#[from] CursorError),

    /// Invalid configuration (fatal at startup)
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Bulk processor lifecycle errors
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// Mapping a raw response into a typed value failed
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// The caller supplied arguments the cluster cannot act on.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

/// Failures of a whole remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within the transport timeout.
    #[error("request to {backend_name} timed out: {message}")]
    Timeout {
        backend_name: String,
        message: String,
    },

    /// The connection could not be established or was dropped.
    #[error("connection to {backend_name} failed: {message}")]
    Connection {
        backend_name: String,
        message: String,
    },

    /// The cluster pushed back (429, 502, 503, 504); safe to retry.
    #[error("{backend_name} rejected the request with status {status}: {message}")]
    Rejected {
        backend_name: String,
        status: u16,
        message: String,
    },

    /// The cluster answered with a non-retryable error status.
    #[error("{backend_name} returned status {status}: {message}")]
    Status {
        backend_name: String,
        status: u16,
        message: String,
    },

    /// The response body could not be decoded.
    #[error("failed to decode {backend_name} response: {message}")]
    Decode {
        backend_name: String,
        message: String,
    },

    /// The scroll context behind a cursor no longer exists on the cluster.
    #[error("scroll context missing on {backend_name}: {message}")]
    ScrollContextMissing {
        backend_name: String,
        message: String,
    },

    /// The client has been closed.
    #[error("{backend_name} client is closed")]
    Closed { backend_name: String },
}

impl TransportError {
    /// Returns true if the failed call may succeed when retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. }
                | TransportError::Connection { .. }
                | TransportError::Rejected { .. }
        )
    }

    /// Returns the status code carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Rejected { status, .. } | TransportError::Status { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Returns true for status codes the cluster uses to signal back-pressure.
    pub fn is_retryable_status(status: u16) -> bool {
        matches!(status, 429 | 502 | 503 | 504)
    }
}

/// Scroll cursor errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    /// Continuation requested on a session that is not open.
    #[error("invalid scroll cursor: session is {state}")]
    InvalidCursor { state: CursorState },
}

/// The terminal state a cursor was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// All pages were returned.
    Exhausted,
    /// The keep-alive elapsed without a continuation.
    Expired,
    /// The caller closed the session.
    Closed,
}

impl fmt::Display for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorState::Exhausted => write!(f, "exhausted"),
            CursorState::Expired => write!(f, "expired"),
            CursorState::Closed => write!(f, "closed"),
        }
    }
}

/// Configuration errors. Always fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// One or more settings are out of range.
    #[error("invalid configuration: {}", problems.join("; "))]
    Invalid { problems: Vec<String> },

    /// A node URL could not be parsed.
    #[error("invalid node url '{url}': {message}")]
    InvalidNodeUrl { url: String, message: String },

    /// The cluster client could not be built.
    #[error("failed to build {backend_name} client: {message}")]
    ClientBuild {
        backend_name: String,
        message: String,
    },
}

/// Bulk processor lifecycle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// The processor is shutting down and refuses new mutations.
    #[error("bulk processor is closed")]
    Closed,

    /// The dispatcher task stopped before accepting a batch.
    #[error("bulk dispatcher stopped before accepting batch")]
    DispatcherGone,
}

/// Mapper failures.
#[derive(Error, Debug)]
pub enum MappingError {
    /// A hit or response did not have the expected shape.
    #[error("cannot map row {row}: {message}")]
    Row { row: usize, message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl MappingError {
    /// Creates a row mapping error.
    pub fn row(row: usize, message: impl Into<String>) -> Self {
        MappingError::Row {
            row,
            message: message.into(),
        }
    }
}

/// Result type alias for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

impl From<serde_json::Error> for MappingError {
    fn from(err: serde_json::Error) -> Self {
        MappingError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        IndexerError::Mapping(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_retryable() {
        let timeout = TransportError::Timeout {
            backend_name: "elasticsearch".to_string(),
            message: "30s".to_string(),
        };
        assert!(timeout.is_retryable());

        let rejected = TransportError::Rejected {
            backend_name: "elasticsearch".to_string(),
            status: 429,
            message: "too many requests".to_string(),
        };
        assert!(rejected.is_retryable());
        assert_eq!(rejected.status(), Some(429));

        let status = TransportError::Status {
            backend_name: "elasticsearch".to_string(),
            status: 400,
            message: "parse error".to_string(),
        };
        assert!(!status.is_retryable());

        let missing = TransportError::ScrollContextMissing {
            backend_name: "elasticsearch".to_string(),
            message: "No search context found".to_string(),
        };
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_retryable_status_codes() {
        for status in [429, 502, 503, 504] {
            assert!(TransportError::is_retryable_status(status));
        }
        for status in [400, 401, 404, 409, 500] {
            assert!(!TransportError::is_retryable_status(status));
        }
    }

    #[test]
    fn test_cursor_error_display() {
        let err = CursorError::InvalidCursor {
            state: CursorState::Exhausted,
        };
        assert_eq!(
            err.to_string(),
            "invalid scroll cursor: session is exhausted"
        );
    }

    #[test]
    fn test_configuration_error_display() {
        let err = ConfigurationError::Invalid {
            problems: vec![
                "max_batch_count cannot be 0".to_string(),
                "scroll page_size cannot be 0".to_string(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration: max_batch_count cannot be 0; scroll page_size cannot be 0"
        );
    }

    #[test]
    fn test_indexer_error_from_categories() {
        let err: IndexerError = ProcessorError::Closed.into();
        assert!(matches!(err, IndexerError::Processor(ProcessorError::Closed)));

        let err: IndexerError = CursorError::InvalidCursor {
            state: CursorState::Expired,
        }
        .into();
        assert!(matches!(err, IndexerError::Cursor(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: IndexerError = json_err.into();
        assert!(matches!(
            err,
            IndexerError::Mapping(MappingError::Serialization { .. })
        ));
    }
}
