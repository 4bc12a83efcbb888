//! Domain layer for the search engine port
//!
//! # Domain Models
//!
//! - `Document`: field map written to / read from an index
//! - `BulkItem` / `BulkResponse`: per-command outcome of a `_bulk` request
//! - `SearchHit` / `ScrollPage`: read-side results
//! - `ShardRecovery`: shard allocation state of a freshly built index
//!
//! # Port Trait
//!
//! - `SearchEngine`: every engine operation the indexer relies on
//!
//! # Examples
//!
//! ```rust
//! use indexsync_storage::domain::Document;
//! use serde_json::json;
//!
//! let doc = Document::from_value(json!({
//!     "link": "/bank-holidays",
//!     "_type": "edition",
//! })).unwrap();
//! assert_eq!(doc.id(), Some("/bank-holidays"));
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::{Result, StorageError};

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Fields that describe where a document lives rather than what it says.
/// They are carried on bulk action lines and never written into a source body.
pub const META_FIELDS: [&str; 3] = ["_id", "_type", "_version"];

/// Field names with typed accessors on [`Document`]
pub mod fields {
    pub const ID: &str = "_id";
    pub const TYPE: &str = "_type";
    pub const LINK: &str = "link";
    pub const CONTENT_ID: &str = "content_id";
    pub const FORMAT: &str = "format";
    pub const PAYLOAD_VERSION: &str = "payload_version";
    pub const POPULARITY: &str = "popularity";
    pub const ORGANISATIONS: &str = "organisations";
}

/// A document: a mapping from field name to JSON value
///
/// Always expected to carry `link` and `_type`. `_id` defaults to `link`
/// when absent; `_id` is unique within a physical index and type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Build from a JSON value; anything but an object is rejected
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(StorageError::invalid_request(format!(
                "document must be a JSON object, got: {}",
                other
            ))),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.0.get_mut(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn link(&self) -> Option<&str> {
        self.get_str(fields::LINK)
    }

    pub fn doc_type(&self) -> Option<&str> {
        self.get_str(fields::TYPE)
    }

    /// `_id`, falling back to `link`
    pub fn id(&self) -> Option<&str> {
        self.get_str(fields::ID).or_else(|| self.link())
    }

    /// Non-empty `content_id`
    pub fn content_id(&self) -> Option<&str> {
        self.get_str(fields::CONTENT_ID).filter(|id| !id.is_empty())
    }

    /// `format`, ignoring explicit nulls
    pub fn format(&self) -> Option<&str> {
        self.get_str(fields::FORMAT)
    }

    pub fn payload_version(&self) -> Option<u64> {
        self.0.get(fields::PAYLOAD_VERSION).and_then(Value::as_u64)
    }

    /// Source body for the engine: the document without [`META_FIELDS`]
    pub fn source(&self) -> Map<String, Value> {
        self.0
            .iter()
            .filter(|(k, _)| !META_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Bulk command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkOp {
    Index,
    Create,
    Delete,
    Update,
}

impl BulkOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkOp::Index => "index",
            BulkOp::Create => "create",
            BulkOp::Delete => "delete",
            BulkOp::Update => "update",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "index" => Ok(BulkOp::Index),
            "create" => Ok(BulkOp::Create),
            "delete" => Ok(BulkOp::Delete),
            "update" => Ok(BulkOp::Update),
            _ => Err(StorageError::invalid_request(format!(
                "Invalid bulk action: {}",
                s
            ))),
        }
    }

    /// Whether an action line of this op is followed by a source line
    pub fn has_source(&self) -> bool {
        !matches!(self, BulkOp::Delete)
    }
}

impl std::fmt::Display for BulkOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Versioning mode of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionType {
    /// Engine increments the version on every write
    #[default]
    Internal,
    /// Caller supplies the version; writes apply only if it is strictly greater
    External,
}

impl VersionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionType::Internal => "internal",
            VersionType::External => "external",
        }
    }
}

/// Error attached to one bulk item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemError {
    /// Structured error type, when the engine reports one
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Free-text reason
    pub reason: String,
}

/// Outcome of one bulk command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItem {
    pub op: BulkOp,
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type")]
    pub doc_type: String,
    #[serde(rename = "_id")]
    pub id: String,
    pub status: u16,
    #[serde(rename = "_version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BulkItemError>,
}

impl BulkItem {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Response of a `_bulk` request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub took_ms: u64,
    /// True when at least one item carries an error
    pub errors: bool,
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    pub fn failed_items(&self) -> impl Iterator<Item = &BulkItem> {
        self.items.iter().filter(|item| item.is_error())
    }
}

/// Response of a single-document delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub found: bool,
    pub version: Option<u64>,
}

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type")]
    pub doc_type: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,
}

impl SearchHit {
    /// Source merged with its `_id` and `_type`
    pub fn into_document(self) -> Document {
        let mut map = self.source;
        map.insert("_id".to_string(), Value::String(self.id));
        map.insert("_type".to_string(), Value::String(self.doc_type));
        Document(map)
    }
}

/// Response of a plain search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

/// One page of a scrolled search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollPage {
    /// Server-side cursor to continue from; `None` once released
    pub scroll_id: Option<String>,
    pub hits: Vec<SearchHit>,
}

/// Shard recovery stage as reported by the engine's recovery API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStage {
    Init,
    Index,
    VerifyIndex,
    Translog,
    Finalize,
    Done,
}

impl RecoveryStage {
    pub fn is_done(&self) -> bool {
        *self == RecoveryStage::Done
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRecovery {
    pub shard: u32,
    pub stage: RecoveryStage,
}

/// One step of an atomic alias update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait
// ═══════════════════════════════════════════════════════════════════════════

/// Search engine port
///
/// All implementations must be safe for concurrent use: ingest workers and
/// rebuild batches share one engine handle.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Index lifecycle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Aliases for `name` (an alias or a physical index), keyed by physical index
    ///
    /// Fails with `NotFound` when no index or alias matches.
    async fn get_aliases(&self, name: &str) -> Result<BTreeMap<String, Vec<String>>>;

    /// Physical indices whose name starts with `prefix`
    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>>;

    async fn create_index(&self, name: &str, settings: &Value) -> Result<()>;

    async fn delete_index(&self, name: &str) -> Result<()>;

    async fn close_index(&self, name: &str) -> Result<()>;

    async fn put_settings(&self, index: &str, settings: &Value) -> Result<()>;

    /// Apply all actions atomically
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()>;

    /// Shard recovery state, one entry per shard
    async fn recovery(&self, index: &str) -> Result<Vec<ShardRecovery>>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Writes
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Submit a newline-delimited bulk body
    ///
    /// Item-level failures are reported in the response, not as `Err`.
    async fn bulk(&self, index: &str, body: &str) -> Result<BulkResponse>;

    /// Delete one document, optionally with an external version check
    ///
    /// Fails with `NotFound`, `Forbidden` (write block) or `VersionConflict`.
    async fn delete_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        version: Option<u64>,
    ) -> Result<DeleteResponse>;

    /// Make recent writes visible to search and scroll
    async fn refresh(&self, index: &str) -> Result<()>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Reads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Realtime get; `doc_type = None` matches any type
    async fn get_document(
        &self,
        index: &str,
        doc_type: Option<&str>,
        id: &str,
    ) -> Result<Option<SearchHit>>;

    async fn search(&self, indices: &[String], body: &Value) -> Result<SearchResponse>;

    /// Run a named analyzer over `text`, returning tokens in order
    async fn analyze(&self, index: &str, analyzer: &str, text: &str) -> Result<Vec<String>>;

    /// Open a scroll and return its first page
    ///
    /// `page_size` is per shard.
    async fn open_scroll(
        &self,
        indices: &[String],
        body: &Value,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<ScrollPage>;

    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<ScrollPage>;

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()>;
}
