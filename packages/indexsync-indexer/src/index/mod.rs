//! Index handle: every mutation and lifecycle call on one index
//!
//! # Write path
//!
//! `bulk_write` is the only method that inserts or updates documents.
//! Documents run through the enrichment pipeline, become `index` commands,
//! and are split into payloads under the configured byte budget.
//!
//! # Failure classification
//!
//! - write block → `IndexLocked` (nothing is applied)
//! - external version conflict → not a failure, reported in
//!   [`WriteResult::version_conflicts`]
//! - anything else → `BulkWriteFailure` with every failed item

pub mod group;
pub mod lock;

pub use group::IndexGroup;
pub use lock::LockGuard;

use indexsync_storage::{
    BulkItem, Document, SearchEngine, SearchHit, StorageError, VersionType,
};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::bulk::{BulkCommand, BulkPayloadGenerator};
use crate::config::IndexerConfig;
use crate::error::{IndexerError, Result};
use crate::metrics::BulkMetrics;
use crate::pipeline::{DocumentEnrichmentPipeline, EnrichmentContext, BEST_BET_ANALYZER};
use crate::scroll::ScrollCursor;

const CLUSTER_BLOCK_EXCEPTION: &str = "cluster_block_exception";
const VERSION_CONFLICT_EXCEPTION: &str = "version_conflict_engine_exception";

/// Example: `ClusterBlockException[blocked by: [FORBIDDEN/8/index write (api)];]`
fn locked_index_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[FORBIDDEN/[^/]+/index write").expect("valid write block pattern")
    })
}

/// Logical name of a physical index
///
/// `mainstream-2015-05-06t09:00:00z-<uuid>` becomes `mainstream`.
pub fn strip_alias_from_index_name(index_name: &str) -> String {
    let prefix: String = index_name
        .chars()
        .take_while(|c| !c.is_ascii_digit())
        .collect();
    prefix.strip_suffix('-').unwrap_or(&prefix).to_string()
}

/// Whether an engine error describes a write block
///
/// Prefers the structured type; falls back to the free-text reason.
fn is_write_block(error_type: Option<&str>, status: Option<u16>, reason: &str) -> bool {
    match error_type {
        Some(CLUSTER_BLOCK_EXCEPTION) => status.map_or(true, |s| s == 403),
        Some(_) => false,
        None if locked_index_pattern().is_match(reason) => {
            warn!(
                "Write block detected from error text only, engine error format may have changed: {}",
                reason
            );
            true
        }
        None => false,
    }
}

fn is_version_conflict(item: &BulkItem) -> bool {
    item.status == 409
        && item.error.as_ref().map_or(false, |e| {
            e.error_type.as_deref() == Some(VERSION_CONFLICT_EXCEPTION)
                || (e.error_type.is_none() && e.reason.contains("VersionConflictEngineException"))
        })
}

/// What to write
#[derive(Debug, Clone)]
pub enum BulkInput {
    /// Enriched and written as `index` commands
    Documents(Vec<Document>),
    /// Written as given
    Commands(Vec<BulkCommand>),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BulkOptions {
    pub versioning: VersionType,
    /// Per-request deadline; the engine config default when `None`
    pub timeout: Option<Duration>,
}

impl BulkOptions {
    pub fn external() -> Self {
        Self {
            versioning: VersionType::External,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a successful `bulk_write`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResult {
    pub items_written: usize,
    /// Stale external versions the engine ignored
    pub version_conflicts: Vec<BulkItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
    /// The stored document carries an equal or newer version
    StaleVersion,
}

/// Handle on one index (physical name or alias)
#[derive(Clone)]
pub struct IndexHandle {
    engine: Arc<dyn SearchEngine>,
    index_name: String,
    base_name: String,
    is_content_index: bool,
    config: Arc<IndexerConfig>,
    pipeline: DocumentEnrichmentPipeline,
    metrics: Option<BulkMetrics>,
}

impl IndexHandle {
    pub fn new(
        engine: Arc<dyn SearchEngine>,
        index_name: impl Into<String>,
        config: Arc<IndexerConfig>,
    ) -> Self {
        let index_name = index_name.into();
        let base_name = strip_alias_from_index_name(&index_name);
        let is_content_index = config.indices.is_content_index(&base_name);
        Self {
            engine,
            index_name,
            base_name,
            is_content_index,
            config,
            pipeline: DocumentEnrichmentPipeline::local_only(),
            metrics: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: DocumentEnrichmentPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_metrics(mut self, metrics: BulkMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn is_content_index(&self) -> bool {
        self.is_content_index
    }

    pub fn engine(&self) -> &Arc<dyn SearchEngine> {
        &self.engine
    }

    pub fn config(&self) -> &Arc<IndexerConfig> {
        &self.config
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Lifecycle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Physical index behind this name, `None` when nothing matches
    pub async fn resolve_real_name(&self) -> Result<Option<String>> {
        match self.engine.get_aliases(&self.index_name).await {
            Ok(aliases) => Ok(aliases.into_keys().next()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(self.resolve_real_name().await?.is_some())
    }

    pub async fn close(&self) -> Result<()> {
        info!("Closing {}", self.index_name);
        self.engine.close_index(&self.index_name).await?;
        Ok(())
    }

    pub async fn lock(&self) -> Result<()> {
        info!("Locking {}", self.index_name);
        self.engine
            .put_settings(&self.index_name, &lock::write_block_settings(true))
            .await?;
        Ok(())
    }

    pub async fn unlock(&self) -> Result<()> {
        info!("Unlocking {}", self.index_name);
        self.engine
            .put_settings(&self.index_name, &lock::write_block_settings(false))
            .await?;
        Ok(())
    }

    /// Lock and return the guard that unlocks
    pub async fn lock_guard(&self) -> Result<LockGuard> {
        LockGuard::acquire(self.engine.clone(), &self.index_name).await
    }

    /// Run `body` with writes blocked; the block is lifted on every exit path
    pub async fn with_lock<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.lock_guard().await?;
        let result = body().await;
        let released = guard.release().await;
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), released) => {
                if let Err(unlock_error) = released {
                    error!("Failed to unlock {}: {}", self.index_name, unlock_error);
                }
                Err(e)
            }
        }
    }

    /// Refresh so written documents become searchable
    pub async fn commit(&self) -> Result<()> {
        self.engine.refresh(&self.index_name).await?;
        Ok(())
    }

    /// Whether every shard has finished recovery
    pub async fn recovered(&self) -> Result<bool> {
        let shards = self.engine.recovery(&self.index_name).await?;
        Ok(shards.iter().all(|shard| shard.stage.is_done()))
    }

    /// Poll `recovered()` until true or `max_polls` run out
    pub async fn wait_for_recovery(&self, poll_interval: Duration, max_polls: u32) -> Result<()> {
        for poll in 1..=max_polls {
            if self.recovered().await? {
                info!("{} recovered after {} poll(s)", self.index_name, poll);
                return Ok(());
            }
            if poll < max_polls {
                tokio::time::sleep(poll_interval).await;
            }
        }
        Err(IndexerError::RecoveryIncomplete {
            index: self.index_name.clone(),
            polls: max_polls,
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Writes
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn add(&self, documents: Vec<Document>) -> Result<WriteResult> {
        self.bulk_write(BulkInput::Documents(documents), BulkOptions::default())
            .await
    }

    pub async fn bulk_write(&self, input: BulkInput, options: BulkOptions) -> Result<WriteResult> {
        let commands = match input {
            BulkInput::Documents(documents) => {
                info!(
                    "Adding {} document(s) to {}",
                    documents.len(),
                    self.index_name
                );
                self.document_commands(documents, options.versioning).await?
            }
            BulkInput::Commands(commands) => commands,
        };
        if commands.is_empty() {
            return Ok(WriteResult::default());
        }

        let timeout = options
            .timeout
            .unwrap_or_else(|| self.config.engine.bulk_timeout());
        let generator = BulkPayloadGenerator::new(self.config.rebuild.max_payload_bytes);
        let mut result = WriteResult::default();

        for payload in generator.payloads(&commands)? {
            let response =
                tokio::time::timeout(timeout, self.engine.bulk(&self.index_name, &payload.body))
                    .await
                    .map_err(|_| {
                        IndexerError::Timeout(format!(
                            "bulk write of {} command(s) to {} exceeded {:?}",
                            payload.commands, self.index_name, timeout
                        ))
                    })??;
            self.absorb(response.items, &mut result)?;
        }
        Ok(result)
    }

    async fn document_commands(
        &self,
        documents: Vec<Document>,
        versioning: VersionType,
    ) -> Result<Vec<BulkCommand>> {
        let mut ctx = EnrichmentContext::new(
            self.engine.clone(),
            self.index_name.clone(),
            self.base_name.clone(),
            self.is_content_index,
        );
        let (documents, _) = self.pipeline.prepare_all(documents, &mut ctx).await?;
        documents
            .iter()
            .map(|doc| {
                let command = BulkCommand::index(doc)?;
                match versioning {
                    VersionType::External => command.into_external(),
                    VersionType::Internal => Ok(command),
                }
            })
            .collect()
    }

    fn absorb(&self, items: Vec<BulkItem>, result: &mut WriteResult) -> Result<()> {
        let mut locked = false;
        let mut failed = Vec::new();

        for item in items {
            let Some(err) = &item.error else {
                result.items_written += 1;
                continue;
            };
            if is_write_block(err.error_type.as_deref(), Some(item.status), &err.reason) {
                locked = true;
            } else if is_version_conflict(&item) {
                result.version_conflicts.push(item);
            } else {
                failed.push(item);
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.items_written.inc_by(result.items_written as u64);
            metrics
                .version_conflicts
                .inc_by(result.version_conflicts.len() as u64);
            metrics.items_failed.inc_by(failed.len() as u64);
        }

        if locked {
            return Err(IndexerError::IndexLocked {
                index: self.index_name.clone(),
            });
        }
        if !failed.is_empty() {
            for item in &failed {
                error!(
                    "Bulk item [{}][{}] failed with status {}: {:?}",
                    item.doc_type, item.id, item.status, item.error
                );
            }
            return Err(IndexerError::BulkWriteFailure {
                index: self.index_name.clone(),
                failed_items: failed,
            });
        }
        Ok(())
    }

    /// Merge `updates` into the stored document and re-index it
    pub async fn amend(&self, id: &str, updates: Map<String, Value>) -> Result<WriteResult> {
        if updates.contains_key("link") {
            return Err(IndexerError::validation("Cannot change a document's link"));
        }
        let mut document = self
            .get_document(id)
            .await?
            .ok_or_else(|| IndexerError::NotFound(format!("{} in {}", id, self.index_name)))?;
        for (field, value) in updates {
            document.insert(field, value);
        }
        self.add(vec![document]).await
    }

    fn classify_storage_error(&self, e: StorageError) -> IndexerError {
        if is_write_block(e.error_type.as_deref(), e.kind.status(), &e.message) {
            IndexerError::IndexLocked {
                index: self.index_name.clone(),
            }
        } else {
            e.into()
        }
    }

    /// Delete one document; deleting an absent document succeeds
    pub async fn delete(&self, doc_type: &str, id: &str) -> Result<bool> {
        match self
            .engine
            .delete_document(&self.index_name, doc_type, id, None)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() && !e.is_index_not_found() => Ok(true),
            Err(e) => Err(self.classify_storage_error(e)),
        }
    }

    /// Delete only if `version` is newer than the stored document's
    pub async fn delete_versioned(
        &self,
        doc_type: &str,
        id: &str,
        version: u64,
    ) -> Result<DeleteOutcome> {
        match self
            .engine
            .delete_document(&self.index_name, doc_type, id, Some(version))
            .await
        {
            Ok(response) if response.found => Ok(DeleteOutcome::Deleted),
            Ok(_) => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) if e.is_not_found() && !e.is_index_not_found() => {
                Ok(DeleteOutcome::AlreadyAbsent)
            }
            Err(e) if e.kind == indexsync_storage::ErrorKind::VersionConflict => {
                Ok(DeleteOutcome::StaleVersion)
            }
            Err(e) => Err(self.classify_storage_error(e)),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Reads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Document with `id` in any type, `None` when absent
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self
            .engine
            .get_document(&self.index_name, None, id)
            .await?
            .map(SearchHit::into_document))
    }

    /// Raw hit for `id` (carries `_version`)
    pub async fn get_hit(&self, doc_type: Option<&str>, id: &str) -> Result<Option<SearchHit>> {
        Ok(self
            .engine
            .get_document(&self.index_name, doc_type, id)
            .await?)
    }

    /// Search hits for a query body
    pub async fn search(&self, body: &Value) -> Result<Vec<SearchHit>> {
        let response = self
            .engine
            .search(&[self.index_name.clone()], body)
            .await?;
        Ok(response.hits)
    }

    pub async fn analyze(&self, text: &str, analyzer: &str) -> Result<Vec<String>> {
        Ok(self
            .engine
            .analyze(&self.index_name, analyzer, text)
            .await?)
    }

    /// Best-bet analyzer tokens joined by single spaces
    pub async fn analyzed_query(&self, text: &str) -> Result<String> {
        Ok(self.analyze(text, BEST_BET_ANALYZER).await?.join(" "))
    }

    pub fn scroll_with<T, F>(&self, query: Value, page_size: usize, transform: F) -> ScrollCursor<T>
    where
        T: Send + 'static,
        F: Fn(SearchHit) -> T + Send + Sync + 'static,
    {
        ScrollCursor::new(
            self.engine.clone(),
            vec![self.index_name.clone()],
            query,
            page_size,
            self.config.scroll.keep_alive(),
            transform,
        )
    }

    pub fn scroll(&self, query: Value, page_size: usize) -> ScrollCursor<Document> {
        self.scroll_with(query, page_size, SearchHit::into_document)
    }

    pub fn all_documents(&self) -> ScrollCursor<Document> {
        self.scroll(
            json!({"query": {"match_all": {}}}),
            self.config.scroll.batch_size,
        )
    }
}
