//! Integration tests for scrolled copies and zero-downtime rebuilds
//!
//! - Copy batching and version preservation
//! - Alias cutover and cleanup of old generations
//! - Failure and cancellation leave the alias and the old generation intact

use async_trait::async_trait;
use indexsync_indexer::{
    match_all, BatchDispatcher, CopyBatch, ErrorCategory, IndexGroup, IndexerConfig, JobState,
    ReindexOrchestrator, Result as IndexerResult,
};
use indexsync_storage::{
    AliasAction, BulkItemError, BulkResponse, DeleteResponse, Document, InMemorySearchEngine,
    RecoveryStage, Result, ScrollPage, SearchEngine, SearchHit, SearchResponse, ShardRecovery,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn config() -> Arc<IndexerConfig> {
    let mut config = IndexerConfig::default();
    config.rebuild.scroll_page_size = 3;
    config.rebuild.processing_batch_size = 4;
    config.rebuild.max_concurrent_batches = 2;
    config.rebuild.recovery_poll_interval_ms = 10;
    config.rebuild.recovery_max_polls = 3;
    Arc::new(config)
}

fn edition(link: &str, title: &str) -> Document {
    Document::from_value(json!({"_type": "edition", "link": link, "title": title})).unwrap()
}

/// Group with one aliased generation holding `count` documents
async fn seeded_group(engine: Arc<dyn SearchEngine>, count: usize) -> (IndexGroup, String) {
    let group = IndexGroup::new(engine, "government", config());
    let first = group.create_index().await.unwrap();
    let docs = (0..count)
        .map(|i| edition(&format!("/doc-{:03}", i), &format!("Document {}", i)))
        .collect();
    first.add(docs).await.unwrap();
    first.commit().await.unwrap();
    group.switch_to(&first).await.unwrap();
    (group, first.index_name().to_string())
}

#[tokio::test]
async fn test_rebuild_switches_alias_and_cleans_old_generation() {
    let engine = InMemorySearchEngine::new();
    let (group, old) = seeded_group(Arc::new(engine.clone()), 10).await;

    let job = ReindexOrchestrator::new(config())
        .rebuild(&group, match_all())
        .await
        .unwrap();

    match &job.state {
        JobState::Completed {
            documents_copied, ..
        } => assert_eq!(*documents_copied, 10),
        other => panic!("expected completed, got {:?}", other),
    }
    let new = job.new_index.clone().unwrap();
    assert_eq!(job.previous_index.as_deref(), Some(old.as_str()));
    assert_eq!(job.cleaned, vec![old.clone()]);
    assert_eq!(
        group.current_real_name().await.unwrap().as_deref(),
        Some(new.as_str())
    );
    assert_eq!(group.index_names().await.unwrap(), vec![new.clone()]);
    assert_eq!(engine.document_count(&new).unwrap(), 10);
    assert!(!engine.is_write_blocked(&new).unwrap());
}

#[tokio::test]
async fn test_rebuild_preserves_versions() {
    let engine = InMemorySearchEngine::new();
    let group = IndexGroup::new(Arc::new(engine.clone()), "government", config());
    let first = group.create_index().await.unwrap();
    let mut doc = edition("/versioned", "Versioned");
    doc.insert("payload_version", 42);
    first
        .bulk_write(
            indexsync_indexer::BulkInput::Documents(vec![doc]),
            indexsync_indexer::BulkOptions::external(),
        )
        .await
        .unwrap();
    first.commit().await.unwrap();
    group.switch_to(&first).await.unwrap();

    let job = ReindexOrchestrator::new(config())
        .rebuild(&group, match_all())
        .await
        .unwrap();
    assert!(job.is_completed());

    let hit = group
        .alias()
        .get_hit(Some("edition"), "/versioned")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.version, Some(42));
    assert!(!hit.source.contains_key("payload_version"));
}

#[tokio::test]
async fn test_first_rebuild_creates_alias() {
    let engine = InMemorySearchEngine::new();
    let group = IndexGroup::new(Arc::new(engine), "government", config());

    let job = ReindexOrchestrator::new(config())
        .rebuild(&group, match_all())
        .await
        .unwrap();

    assert!(job.is_completed());
    assert!(job.previous_index.is_none());
    assert_eq!(group.current_real_name().await.unwrap(), job.new_index);
}

#[tokio::test]
async fn test_cancelled_rebuild_keeps_old_generation() {
    let engine = InMemorySearchEngine::new();
    let (group, old) = seeded_group(Arc::new(engine.clone()), 6).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let job = ReindexOrchestrator::new(config())
        .with_cancellation(cancel)
        .rebuild(&group, match_all())
        .await
        .unwrap();

    assert!(matches!(job.state, JobState::Cancelled { .. }));
    assert_eq!(
        group.current_real_name().await.unwrap().as_deref(),
        Some(old.as_str())
    );
    assert_eq!(group.index_names().await.unwrap(), vec![old.clone()]);
    assert!(!engine.is_write_blocked(&old).unwrap());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// Every index except `healthy` reports shards still recovering
    StuckRecovery,
    /// Once `healthy` is set, every bulk item sent to another index fails
    RejectBulk,
}

struct FaultyEngine {
    inner: InMemorySearchEngine,
    fault: Fault,
    healthy: parking_lot::Mutex<Option<String>>,
}

impl FaultyEngine {
    fn new(inner: InMemorySearchEngine, fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fault,
            healthy: parking_lot::Mutex::new(None),
        })
    }
}

#[async_trait]
impl SearchEngine for FaultyEngine {
    async fn get_aliases(&self, name: &str) -> Result<BTreeMap<String, Vec<String>>> {
        self.inner.get_aliases(name).await
    }
    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_indices(prefix).await
    }
    async fn create_index(&self, name: &str, settings: &Value) -> Result<()> {
        self.inner.create_index(name, settings).await
    }
    async fn delete_index(&self, name: &str) -> Result<()> {
        self.inner.delete_index(name).await
    }
    async fn close_index(&self, name: &str) -> Result<()> {
        self.inner.close_index(name).await
    }
    async fn put_settings(&self, index: &str, settings: &Value) -> Result<()> {
        self.inner.put_settings(index, settings).await
    }
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        self.inner.update_aliases(actions).await
    }
    async fn recovery(&self, index: &str) -> Result<Vec<ShardRecovery>> {
        let mut shards = self.inner.recovery(index).await?;
        if self.fault == Fault::StuckRecovery && self.healthy.lock().as_deref() != Some(index) {
            for shard in &mut shards {
                shard.stage = RecoveryStage::Translog;
            }
        }
        Ok(shards)
    }
    async fn bulk(&self, index: &str, body: &str) -> Result<BulkResponse> {
        let mut response = self.inner.bulk(index, body).await?;
        let rejecting = self.fault == Fault::RejectBulk
            && self
                .healthy
                .lock()
                .as_deref()
                .is_some_and(|healthy| healthy != index);
        if rejecting {
            response.errors = true;
            for item in &mut response.items {
                item.status = 400;
                item.version = None;
                item.error = Some(BulkItemError {
                    error_type: Some("mapper_parsing_exception".to_string()),
                    reason: "failed to parse [public_timestamp]".to_string(),
                });
            }
        }
        Ok(response)
    }
    async fn delete_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        version: Option<u64>,
    ) -> Result<DeleteResponse> {
        self.inner.delete_document(index, doc_type, id, version).await
    }
    async fn refresh(&self, index: &str) -> Result<()> {
        self.inner.refresh(index).await
    }
    async fn get_document(
        &self,
        index: &str,
        doc_type: Option<&str>,
        id: &str,
    ) -> Result<Option<SearchHit>> {
        self.inner.get_document(index, doc_type, id).await
    }
    async fn search(&self, indices: &[String], body: &Value) -> Result<SearchResponse> {
        self.inner.search(indices, body).await
    }
    async fn analyze(&self, index: &str, analyzer: &str, text: &str) -> Result<Vec<String>> {
        self.inner.analyze(index, analyzer, text).await
    }
    async fn open_scroll(
        &self,
        indices: &[String],
        body: &Value,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<ScrollPage> {
        self.inner
            .open_scroll(indices, body, page_size, keep_alive)
            .await
    }
    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<ScrollPage> {
        self.inner.scroll(scroll_id, keep_alive).await
    }
    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        self.inner.clear_scroll(scroll_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_unrecovered_generation_is_never_switched_to() {
    let inner = InMemorySearchEngine::new();
    let engine = FaultyEngine::new(inner.clone(), Fault::StuckRecovery);
    let (group, old) = seeded_group(engine.clone(), 5).await;
    *engine.healthy.lock() = Some(old.clone());

    let job = ReindexOrchestrator::new(config())
        .rebuild(&group, match_all())
        .await
        .unwrap();

    match &job.state {
        JobState::Failed {
            error_category,
            error,
            ..
        } => {
            assert_eq!(*error_category, ErrorCategory::Infrastructure);
            assert!(error.contains("did not finish shard recovery"), "{}", error);
        }
        other => panic!("expected failed, got {:?}", other),
    }
    assert_eq!(
        group.current_real_name().await.unwrap().as_deref(),
        Some(old.as_str())
    );
    assert_eq!(group.index_names().await.unwrap(), vec![old.clone()]);
    assert!(!inner.is_write_blocked(&old).unwrap());
    assert_eq!(inner.document_count(&old).unwrap(), 5);
}

#[tokio::test]
async fn test_failed_batch_discards_new_generation() {
    let inner = InMemorySearchEngine::new();
    let engine = FaultyEngine::new(inner.clone(), Fault::RejectBulk);
    let (group, old) = seeded_group(engine.clone(), 6).await;
    *engine.healthy.lock() = Some(old.clone());

    let job = ReindexOrchestrator::new(config())
        .rebuild(&group, match_all())
        .await
        .unwrap();

    match &job.state {
        JobState::Failed {
            error_category,
            error,
            ..
        } => {
            assert_eq!(*error_category, ErrorCategory::Infrastructure);
            assert!(error.starts_with("Bulk write to"), "{}", error);
        }
        other => panic!("expected failed, got {:?}", other),
    }
    let new = job.new_index.clone().unwrap();
    assert_ne!(new, old);
    assert!(!inner.list_indices("government").await.unwrap().contains(&new));
    assert_eq!(group.index_names().await.unwrap(), vec![old.clone()]);
    assert_eq!(
        group.current_real_name().await.unwrap().as_deref(),
        Some(old.as_str())
    );
    assert!(!inner.is_write_blocked(&old).unwrap());
    assert_eq!(inner.document_count(&old).unwrap(), 6);
}

/// Records batch sizes instead of writing
#[derive(Default)]
struct RecordingDispatcher {
    batches: Vec<usize>,
    finished: bool,
}

#[async_trait]
impl BatchDispatcher for RecordingDispatcher {
    async fn dispatch(&mut self, batch: CopyBatch) -> IndexerResult<()> {
        assert_eq!(batch.sequence, self.batches.len() + 1);
        self.batches.push(batch.documents.len());
        Ok(())
    }

    async fn finish(&mut self) -> IndexerResult<()> {
        self.finished = true;
        Ok(())
    }
}

#[tokio::test]
async fn test_copy_regroups_scroll_pages_into_processing_batches() {
    let engine = InMemorySearchEngine::new();
    let (group, _) = seeded_group(Arc::new(engine), 10).await;
    let source = group.current().await.unwrap().unwrap();

    let mut dispatcher = RecordingDispatcher::default();
    let report = ReindexOrchestrator::new(config())
        .run_with(&source, match_all(), &mut dispatcher)
        .await
        .unwrap();

    assert_eq!(report.documents, 10);
    assert_eq!(report.batches, 3);
    assert_eq!(dispatcher.batches, vec![4, 4, 2]);
    assert!(dispatcher.finished);
}

#[tokio::test]
async fn test_copy_between_indices() {
    let engine = InMemorySearchEngine::new();
    let (group, _) = seeded_group(Arc::new(engine.clone()), 7).await;
    let source = group.current().await.unwrap().unwrap();
    let destination = group.create_index().await.unwrap();

    let report = ReindexOrchestrator::new(config())
        .run(
            &source,
            &destination,
            json!({"query": {"term": {"link": "/doc-003"}}}),
        )
        .await
        .unwrap();

    assert_eq!(report.documents, 1);
    assert_eq!(engine.document_count(destination.index_name()).unwrap(), 1);
}
