//! indexsync-storage - search engine port
//!
//! > "One trait for every call that can mutate or read the shared index."
//!
//! ## Contents
//!
//! 1. **Domain**: `Document`, bulk protocol items, search hits, scroll pages,
//!    shard recovery state
//! 2. **Port**: `SearchEngine`, the async trait every engine transport implements
//! 3. **Infrastructure**: `InMemorySearchEngine` (feature `memory`), a faithful
//!    single-process engine used by tests and embedded runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use indexsync_storage::{InMemorySearchEngine, SearchEngine};
//!
//! let engine = InMemorySearchEngine::new();
//! engine.create_index("mainstream-2015-05-06t09", &serde_json::json!({})).await?;
//! let body = "{\"index\":{\"_type\":\"edition\",\"_id\":\"/a\"}}\n{\"link\":\"/a\"}\n";
//! let response = engine.bulk("mainstream-2015-05-06t09", body).await?;
//! assert!(!response.errors);
//! ```

pub mod domain;
pub mod error;

#[cfg(feature = "memory")]
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    fields, AliasAction, BulkItem, BulkItemError, BulkOp, BulkResponse, DeleteResponse, Document,
    RecoveryStage, ScrollPage, SearchEngine, SearchHit, SearchResponse, ShardRecovery,
    VersionType, META_FIELDS,
};

#[cfg(feature = "memory")]
pub use infrastructure::InMemorySearchEngine;
