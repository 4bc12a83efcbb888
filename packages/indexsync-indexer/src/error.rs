use indexsync_storage::{BulkItem, StorageError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    /// The target index carries a write block
    #[error("Index locked: {index}")]
    IndexLocked { index: String },

    /// Bulk items failed for reasons other than a lock or a stale version
    #[error("Bulk write to {index} failed for {} item(s)", failed_items.len())]
    BulkWriteFailure {
        index: String,
        failed_items: Vec<BulkItem>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// An external collaborator (relationship, popularity, classification) failed
    #[error("{service} failed: {message}")]
    Collaborator {
        service: String,
        message: String,
        transient: bool,
    },

    #[error("Index {index} did not finish shard recovery after {polls} polls")]
    RecoveryIncomplete { index: String, polls: u32 },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IndexerError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn validation<E: std::fmt::Display>(e: E) -> Self {
        Self::Validation(e.to_string())
    }

    pub fn collaborator(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            service: service.into(),
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient_collaborator(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            service: service.into(),
            message: message.into(),
            transient: true,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, IndexerError::IndexLocked { .. })
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            IndexerError::Timeout(_) => true,
            IndexerError::Storage(e) => e.kind == indexsync_storage::ErrorKind::Timeout,
            _ => false,
        }
    }

    /// Retry policy bucket for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            IndexerError::IndexLocked { .. } | IndexerError::Timeout(_) => ErrorCategory::Transient,
            IndexerError::Collaborator { transient, .. } => {
                if *transient {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Infrastructure
                }
            }
            IndexerError::Storage(e) => {
                if e.is_transient() {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Infrastructure
                }
            }
            IndexerError::Validation(_)
            | IndexerError::NotFound(_)
            | IndexerError::InvalidStateTransition { .. }
            | IndexerError::Cancelled(_)
            | IndexerError::Config(_)
            | IndexerError::Yaml(_) => ErrorCategory::Permanent,
            IndexerError::BulkWriteFailure { .. }
            | IndexerError::RecoveryIncomplete { .. }
            | IndexerError::Io(_)
            | IndexerError::Prometheus(_)
            | IndexerError::Join(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Whether the failed operation may succeed if repeated later
    pub fn is_retryable(&self) -> bool {
        self.category() != ErrorCategory::Permanent
    }
}

/// Error category for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Transient error - retry automatically (e.g., timeout, index locked)
    Transient,
    /// Permanent error - don't retry (e.g., invalid payload)
    Permanent,
    /// Infrastructure error - alert ops (e.g., rejected bulk items, recovery stuck)
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(IndexerError::validation(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
