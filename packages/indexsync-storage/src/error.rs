//! Error types for indexsync-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
///
/// Mirrors the response classes a search engine reports over its API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Index or document does not exist (HTTP 404)
    NotFound,
    /// Request rejected by an index block (HTTP 403)
    Forbidden,
    /// External version check failed (HTTP 409)
    VersionConflict,
    /// Malformed request (HTTP 400)
    InvalidRequest,
    /// Connection or protocol failure
    Transport,
    /// Request exceeded its deadline
    Timeout,
    /// Serialization/deserialization errors
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::VersionConflict => "version_conflict",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Serialization => "serialization",
        }
    }

    /// HTTP status the engine reports for this kind, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ErrorKind::NotFound => Some(404),
            ErrorKind::Forbidden => Some(403),
            ErrorKind::VersionConflict => Some(409),
            ErrorKind::InvalidRequest => Some(400),
            ErrorKind::Transport | ErrorKind::Timeout | ErrorKind::Serialization => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
    /// Structured error type reported by the engine (e.g. `cluster_block_exception`)
    pub error_type: Option<String>,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            error_type: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    // Convenience constructors
    pub fn index_not_found(index: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("IndexMissingException[[{}] missing]", index.into()),
        )
        .with_error_type("index_not_found_exception")
    }

    pub fn document_not_found(id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("Document not found: {}", id.into()),
        )
    }

    pub fn write_blocked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message).with_error_type("cluster_block_exception")
    }

    pub fn version_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::VersionConflict, message)
            .with_error_type("version_conflict_engine_exception")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    /// The index itself (not a document in it) is missing
    pub fn is_index_not_found(&self) -> bool {
        self.is_not_found() && self.error_type.as_deref() == Some("index_not_found_exception")
    }

    /// Transport-level failures that are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport | ErrorKind::Timeout)
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;
