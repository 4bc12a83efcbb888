//! Change-event ingest
//!
//! Per event: validate → route → apply or skip → settle.
//!
//! - Index writes use external versioning: only a `payload_version` newer
//!   than the stored one applies, anything else is a stale no-op
//! - Unpublishing events become versioned deletes under the same rule
//! - Permanent failures are discarded, everything else is retried with
//!   backoff until the attempt budget is spent, then dead-lettered
//! - A locked index is contention, not failure: the event is requeued after
//!   the capped backoff without spending an attempt

pub mod event;
pub mod pool;
pub mod queue;

pub use event::ChangeEvent;
pub use pool::WorkerPool;
pub use queue::{Delivery, EventQueue, InMemoryEventQueue, Settlement};

use tracing::{error, info, warn};

use crate::classification::ClassificationCache;
use crate::error::{ErrorCategory, IndexerError, Result};
use crate::index::{BulkInput, BulkOptions, DeleteOutcome, IndexHandle};
use crate::metrics::IngestMetrics;
use crate::presenter::EventPresenter;
use crate::retry::RetryPolicy;
use crate::type_inference::DocumentTypeInferer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The stored document carries an equal or newer version
    StaleVersion,
    /// Unpublish of a document that is not stored
    AlreadyAbsent,
    /// The classification service rejected the document type
    Ignored,
}

/// Result of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Indexed,
    Deleted,
    Skipped(SkipReason),
}

impl IngestOutcome {
    /// Metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Indexed => "indexed",
            IngestOutcome::Deleted => "deleted",
            IngestOutcome::Skipped(SkipReason::Ignored) => "ignored",
            IngestOutcome::Skipped(_) => "skipped",
        }
    }
}

/// What happened to a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked(IngestOutcome),
    Discarded,
    Retried { attempt: u32 },
    /// Requeued at the same attempt while the index is locked
    Deferred { attempt: u32 },
    DeadLettered,
}

/// Applies change events to one index
#[derive(Clone)]
pub struct EventIngestWorker {
    index: IndexHandle,
    classification: ClassificationCache,
    inferer: DocumentTypeInferer,
    retry: RetryPolicy,
    metrics: Option<IngestMetrics>,
}

impl EventIngestWorker {
    pub fn new(index: IndexHandle, classification: ClassificationCache, retry: RetryPolicy) -> Self {
        Self {
            inferer: DocumentTypeInferer::new(index.clone()),
            index,
            classification,
            retry,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: IngestMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn index(&self) -> &IndexHandle {
        &self.index
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Apply
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Apply one event without settling it
    pub async fn process_event(&self, event: &ChangeEvent) -> Result<IngestOutcome> {
        let base_path = event
            .base_path()
            .ok_or_else(|| IndexerError::validation("base_path missing from payload"))?;

        if event.unpublishing {
            return self.unpublish(event, base_path).await;
        }
        if !self.classification.is_indexable(&event.payload).await? {
            info!(
                "Ignoring {} event for {}: not indexable",
                event.document_type().unwrap_or("untyped"),
                base_path
            );
            return Ok(IngestOutcome::Skipped(SkipReason::Ignored));
        }
        self.publish(event, base_path).await
    }

    async fn publish(&self, event: &ChangeEvent, base_path: &str) -> Result<IngestOutcome> {
        let version = required_version(event)?;
        let doc_type = self
            .inferer
            .infer(&event.payload, base_path)
            .await?
            .ok_or_else(|| {
                IndexerError::validation(format!("unpublishing type in publish event for {}", base_path))
            })?;

        // the version check is per `_type`, so a copy stored under another
        // type has to be compared here
        let replaced = match self.index.get_hit(None, base_path).await? {
            Some(hit) if hit.doc_type != doc_type => {
                if hit.version.is_some_and(|stored| stored >= version) {
                    return Ok(self.stale(version, base_path));
                }
                Some(hit.doc_type)
            }
            _ => None,
        };

        let document = EventPresenter::new(&event.payload, doc_type).document()?;
        let written = self
            .index
            .bulk_write(BulkInput::Documents(vec![document]), BulkOptions::external())
            .await?;
        if !written.version_conflicts.is_empty() {
            return Ok(self.stale(version, base_path));
        }

        if let Some(old_type) = replaced {
            self.index.delete_versioned(&old_type, base_path, version).await?;
            info!(
                "Removed {} copy of {} from {} after type change",
                old_type,
                base_path,
                self.index.index_name()
            );
        }
        Ok(IngestOutcome::Indexed)
    }

    fn stale(&self, version: u64, base_path: &str) -> IngestOutcome {
        info!(
            "Discarding stale version {} of {} in {}",
            version,
            base_path,
            self.index.index_name()
        );
        IngestOutcome::Skipped(SkipReason::StaleVersion)
    }

    async fn unpublish(&self, event: &ChangeEvent, base_path: &str) -> Result<IngestOutcome> {
        let version = required_version(event)?;
        let Some(doc_type) = self.inferer.infer(&event.payload, base_path).await? else {
            info!("{} already absent from {}", base_path, self.index.index_name());
            return Ok(IngestOutcome::Skipped(SkipReason::AlreadyAbsent));
        };

        match self.index.delete_versioned(&doc_type, base_path, version).await? {
            DeleteOutcome::Deleted => {
                info!(
                    "Deleted {} from {} at version {}",
                    base_path,
                    self.index.index_name(),
                    version
                );
                Ok(IngestOutcome::Deleted)
            }
            DeleteOutcome::AlreadyAbsent => Ok(IngestOutcome::Skipped(SkipReason::AlreadyAbsent)),
            DeleteOutcome::StaleVersion => {
                info!(
                    "Discarding stale unpublish {} of {} in {}",
                    version,
                    base_path,
                    self.index.index_name()
                );
                Ok(IngestOutcome::Skipped(SkipReason::StaleVersion))
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Settle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Apply a delivery's event and settle the delivery
    ///
    /// Only a failure to settle is returned as `Err`.
    pub async fn handle(&self, delivery: Box<dyn Delivery>) -> Result<Disposition> {
        let tag = delivery.delivery_tag();
        let attempt = delivery.attempt();
        info!(
            "Processing message [{}]: {}",
            tag,
            delivery.event().log_summary()
        );

        match self.process_event(delivery.event()).await {
            Ok(outcome) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_outcome(outcome.as_str());
                }
                delivery.ack().await?;
                info!("Finished processing message [{}]", tag);
                Ok(Disposition::Acked(outcome))
            }
            Err(e) if e.category() == ErrorCategory::Permanent => {
                error!("Discarding message [{}]: {}", tag, e);
                if let Some(metrics) = &self.metrics {
                    metrics.discards.inc();
                }
                delivery.discard().await?;
                Ok(Disposition::Discarded)
            }
            Err(e) if e.is_locked() => {
                let delay = self.retry.delay(self.retry.max_attempts);
                warn!(
                    "Message [{}] deferred, requeueing in {:?}: {}",
                    tag, delay, e
                );
                if let Some(metrics) = &self.metrics {
                    metrics.retries.inc();
                }
                tokio::time::sleep(delay).await;
                delivery.requeue().await?;
                Ok(Disposition::Deferred { attempt })
            }
            Err(e) if self.retry.exhausted(attempt) => {
                error!(
                    "Dead-lettering message [{}] after {} attempt(s): {}",
                    tag, attempt, e
                );
                if let Some(metrics) = &self.metrics {
                    metrics.dead_letters.inc();
                }
                delivery.dead_letter().await?;
                Ok(Disposition::DeadLettered)
            }
            Err(e) => {
                let delay = self.retry.delay(attempt);
                warn!(
                    "Message [{}] failed (attempt {}/{}, {}), retrying in {:?}: {}",
                    tag,
                    attempt,
                    self.retry.max_attempts,
                    e.category(),
                    delay,
                    e
                );
                if let Some(metrics) = &self.metrics {
                    metrics.retries.inc();
                }
                tokio::time::sleep(delay).await;
                delivery.retry().await?;
                Ok(Disposition::Retried { attempt })
            }
        }
    }
}

fn required_version(event: &ChangeEvent) -> Result<u64> {
    event
        .payload_version
        .ok_or_else(|| IndexerError::validation("payload_version missing from payload"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::memory::DocumentTypeClassifier;
    use crate::config::IndexerConfig;
    use indexsync_storage::{InMemorySearchEngine, SearchEngine};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    async fn worker() -> (InMemorySearchEngine, EventIngestWorker) {
        let engine = InMemorySearchEngine::new();
        engine.create_index("govuk_test", &json!({})).await.unwrap();
        let index = IndexHandle::new(
            Arc::new(engine.clone()),
            "govuk_test",
            Arc::new(IndexerConfig::default()),
        );
        let classification = ClassificationCache::new(
            Arc::new(DocumentTypeClassifier::new(["answer"])),
            Duration::from_secs(300),
            100,
        );
        let retry = RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            max_attempts: 3,
        };
        (engine, EventIngestWorker::new(index, classification, retry))
    }

    fn event(payload: Value) -> ChangeEvent {
        ChangeEvent::from_value(payload, false).unwrap()
    }

    fn answer(version: u64, title: &str) -> ChangeEvent {
        event(json!({
            "base_path": "/vat-rates",
            "document_type": "answer",
            "title": title,
            "payload_version": version
        }))
    }

    async fn stored_title(worker: &EventIngestWorker) -> Option<String> {
        worker
            .index()
            .get_document("/vat-rates")
            .await
            .unwrap()
            .and_then(|doc| doc.get_str("title").map(str::to_string))
    }

    #[tokio::test]
    async fn test_newer_version_applies() {
        let (_, worker) = worker().await;
        assert_eq!(
            worker.process_event(&answer(1, "old")).await.unwrap(),
            IngestOutcome::Indexed
        );
        assert_eq!(
            worker.process_event(&answer(2, "new")).await.unwrap(),
            IngestOutcome::Indexed
        );
        assert_eq!(stored_title(&worker).await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_equal_version_is_stale() {
        let (_, worker) = worker().await;
        worker.process_event(&answer(5, "first")).await.unwrap();
        assert_eq!(
            worker.process_event(&answer(5, "second")).await.unwrap(),
            IngestOutcome::Skipped(SkipReason::StaleVersion)
        );
        assert_eq!(stored_title(&worker).await.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_ignored_format_never_writes() {
        let (_, worker) = worker().await;
        let guide = event(json!({
            "base_path": "/guide",
            "document_type": "guide",
            "payload_version": 1
        }));
        assert_eq!(
            worker.process_event(&guide).await.unwrap(),
            IngestOutcome::Skipped(SkipReason::Ignored)
        );
        assert!(worker.index().get_document("/guide").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_base_path_is_permanent() {
        let (_, worker) = worker().await;
        let err = worker
            .process_event(&event(json!({"document_type": "answer", "payload_version": 1})))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Permanent);
    }

    #[tokio::test]
    async fn test_missing_version_is_permanent() {
        let (_, worker) = worker().await;
        let err = worker
            .process_event(&event(json!({"base_path": "/a", "document_type": "answer"})))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unpublish_of_absent_document() {
        let (_, worker) = worker().await;
        let gone = ChangeEvent::from_value(
            json!({"base_path": "/vat-rates", "document_type": "gone", "payload_version": 3}),
            true,
        )
        .unwrap();
        assert_eq!(
            worker.process_event(&gone).await.unwrap(),
            IngestOutcome::Skipped(SkipReason::AlreadyAbsent)
        );
    }

    #[tokio::test]
    async fn test_handle_discards_invalid_event() {
        let (_, worker) = worker().await;
        let queue = InMemoryEventQueue::new();
        queue.publish(event(json!({"document_type": "answer"})));
        queue.close();

        let delivery = queue.next().await.unwrap();
        assert_eq!(worker.handle(delivery).await.unwrap(), Disposition::Discarded);
        assert_eq!(queue.settled(Settlement::Discarded).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_index_defers_without_spending_attempts() {
        let (engine, worker) = worker().await;
        worker.index().lock().await.unwrap();
        let queue = InMemoryEventQueue::new();
        queue.publish(answer(1, "locked"));
        queue.close();

        let mut dispositions = Vec::new();
        for _ in 0..5 {
            let delivery = queue.next().await.unwrap();
            dispositions.push(worker.handle(delivery).await.unwrap());
        }
        assert!(dispositions
            .iter()
            .all(|d| *d == Disposition::Deferred { attempt: 1 }));
        assert_eq!(engine.document_count("govuk_test").unwrap(), 0);

        worker.index().unlock().await.unwrap();
        let delivery = queue.next().await.unwrap();
        assert_eq!(
            worker.handle(delivery).await.unwrap(),
            Disposition::Acked(IngestOutcome::Indexed)
        );
        assert!(queue.next().await.is_none());
        assert_eq!(stored_title(&worker).await.as_deref(), Some("locked"));
        assert!(queue.settled(Settlement::DeadLettered).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_retries_then_dead_letters_unavailable_collaborator() {
        let engine = InMemorySearchEngine::new();
        engine.create_index("govuk_test", &json!({})).await.unwrap();
        let index = IndexHandle::new(
            Arc::new(engine),
            "govuk_test",
            Arc::new(IndexerConfig::default()),
        );
        let classification = ClassificationCache::new(
            Arc::new(DocumentTypeClassifier::new(["answer"]).unavailable()),
            Duration::from_secs(300),
            100,
        );
        let retry = RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            max_attempts: 3,
        };
        let worker = EventIngestWorker::new(index, classification, retry);
        let queue = InMemoryEventQueue::new();
        queue.publish(answer(1, "unclassified"));
        queue.close();

        let mut dispositions = Vec::new();
        while let Some(delivery) = queue.next().await {
            dispositions.push(worker.handle(delivery).await.unwrap());
        }

        assert_eq!(
            dispositions,
            vec![
                Disposition::Retried { attempt: 1 },
                Disposition::Retried { attempt: 2 },
                Disposition::DeadLettered,
            ]
        );
        assert_eq!(queue.settled(Settlement::DeadLettered).len(), 1);
    }
}
