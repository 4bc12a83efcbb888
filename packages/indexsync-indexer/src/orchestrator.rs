use async_trait::async_trait;
use indexsync_storage::fields::PAYLOAD_VERSION;
use indexsync_storage::{Document, SearchHit, VersionType};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::IndexerConfig;
use crate::error::{IndexerError, Result};
use crate::index::{BulkInput, BulkOptions, IndexGroup, IndexHandle, WriteResult};
use crate::job::{JobStateMachine, RebuildJob, RebuildStage};

/// Outcome of one copy run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub documents: usize,
    pub batches: usize,
}

/// One processing batch of a copy
#[derive(Debug, Clone)]
pub struct CopyBatch {
    /// 1-based position in the run
    pub sequence: usize,
    pub documents: Vec<Document>,
}

/// Where processing batches are sent
#[async_trait]
pub trait BatchDispatcher: Send {
    /// Hand off one batch; may wait for capacity, and reports any earlier
    /// batch failure
    async fn dispatch(&mut self, batch: CopyBatch) -> Result<()>;

    /// Wait for every dispatched batch; the first failure wins
    async fn finish(&mut self) -> Result<()>;
}

/// Runs batches as tokio tasks, at most `max_concurrent` at a time
pub struct InProcessDispatcher {
    destination: IndexHandle,
    options: BulkOptions,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<Result<(usize, WriteResult)>>,
    version_conflicts: usize,
}

impl InProcessDispatcher {
    pub fn new(destination: IndexHandle, options: BulkOptions, max_concurrent: usize) -> Self {
        Self {
            destination,
            options,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tasks: JoinSet::new(),
            version_conflicts: 0,
        }
    }

    /// Stale-version items skipped so far
    pub fn version_conflicts(&self) -> usize {
        self.version_conflicts
    }

    fn absorb(&mut self, joined: std::result::Result<Result<(usize, WriteResult)>, tokio::task::JoinError>) -> Result<()> {
        match joined {
            Ok(Ok((sequence, written))) => {
                self.version_conflicts += written.version_conflicts.len();
                info!(
                    "Batch {} written to {}: {} item(s), {} stale",
                    sequence,
                    self.destination.index_name(),
                    written.items_written,
                    written.version_conflicts.len()
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.tasks.abort_all();
                Err(e)
            }
            Err(join_error) => {
                self.tasks.abort_all();
                Err(join_error.into())
            }
        }
    }

    /// The failure that closed the semaphore
    async fn first_failure(&mut self) -> IndexerError {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = self.absorb(joined) {
                return e;
            }
        }
        IndexerError::Cancelled(format!(
            "dispatch to {} stopped",
            self.destination.index_name()
        ))
    }
}

#[async_trait]
impl BatchDispatcher for InProcessDispatcher {
    async fn dispatch(&mut self, batch: CopyBatch) -> Result<()> {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return Err(self.first_failure().await),
        };

        let destination = self.destination.clone();
        let options = self.options;
        let semaphore = self.semaphore.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            let result = destination
                .bulk_write(BulkInput::Documents(batch.documents), options)
                .await;
            if result.is_err() {
                // stop admitting further batches
                semaphore.close();
            }
            result.map(|written| (batch.sequence, written))
        });
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            self.absorb(joined)?;
        }
        Ok(())
    }
}

/// Scrolled copies between indices and zero-downtime rebuilds
pub struct ReindexOrchestrator {
    config: Arc<IndexerConfig>,
    cancel: CancellationToken,
}

impl ReindexOrchestrator {
    pub fn new(config: Arc<IndexerConfig>) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop issuing batches (and never switch the alias) once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn bulk_options(&self) -> BulkOptions {
        let versioning = if self.config.rebuild.preserve_versions {
            VersionType::External
        } else {
            VersionType::Internal
        };
        BulkOptions {
            versioning,
            timeout: Some(self.config.engine.bulk_timeout()),
        }
    }

    fn ensure_not_cancelled(&self, what: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(IndexerError::Cancelled(what.to_string()));
        }
        Ok(())
    }

    /// Copy every document of `source` matching `query` into `destination`
    pub async fn run(
        &self,
        source: &IndexHandle,
        destination: &IndexHandle,
        query: Value,
    ) -> Result<CopyReport> {
        let mut dispatcher = InProcessDispatcher::new(
            destination.clone(),
            self.bulk_options(),
            self.config.rebuild.max_concurrent_batches,
        );
        self.run_with(source, query, &mut dispatcher).await
    }

    /// Copy through a caller-supplied dispatcher
    pub async fn run_with(
        &self,
        source: &IndexHandle,
        query: Value,
        dispatcher: &mut dyn BatchDispatcher,
    ) -> Result<CopyReport> {
        let start = Instant::now();
        let batch_size = self.config.rebuild.processing_batch_size.max(1);
        let preserve_versions = self.config.rebuild.preserve_versions;
        let mut cursor = source.scroll_with(
            query,
            self.config.rebuild.scroll_page_size,
            move |hit| copied_document(hit, preserve_versions),
        );

        let mut report = CopyReport::default();
        let mut pending = Vec::with_capacity(batch_size);
        loop {
            let next = cursor.next().await?;
            let done = next.is_none();
            if let Some(document) = next {
                pending.push(document);
            }
            if pending.len() >= batch_size || (done && !pending.is_empty()) {
                self.ensure_not_cancelled("copy cancelled")?;
                report.batches += 1;
                report.documents += pending.len();
                dispatcher
                    .dispatch(CopyBatch {
                        sequence: report.batches,
                        documents: std::mem::replace(&mut pending, Vec::with_capacity(batch_size)),
                    })
                    .await?;
            }
            if done {
                break;
            }
        }
        dispatcher.finish().await?;

        info!(
            "Copied {} document(s) from {} in {} batch(es) in {}ms",
            report.documents,
            source.index_name(),
            report.batches,
            start.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Rebuild `group` into a new generation and switch the alias to it
    ///
    /// Failures are recorded on the returned job; the alias keeps pointing
    /// at the old generation and the new one is deleted unless the switch
    /// already happened.
    pub async fn rebuild(&self, group: &IndexGroup, query: Value) -> Result<RebuildJob> {
        let mut sm = JobStateMachine::new(RebuildJob::new_queued(group.base_name()));
        sm.start()?;
        let job_id = sm.job().id;
        info!("Rebuild {} of {} started", job_id, group.base_name());

        let mut new_index: Option<IndexHandle> = None;
        let mut switched = false;
        let result = self
            .rebuild_steps(&mut sm, group, query, &mut new_index, &mut switched)
            .await;

        match result {
            Ok(documents) => {
                sm.complete(documents)?;
                info!(
                    "Rebuild {} of {} completed: {} document(s) copied",
                    job_id,
                    group.base_name(),
                    documents
                );
            }
            Err(e) => {
                if !switched {
                    if let Some(handle) = &new_index {
                        discard_generation(handle).await;
                    }
                }
                if matches!(e, IndexerError::Cancelled(_)) {
                    warn!("Rebuild {} of {} cancelled: {}", job_id, group.base_name(), e);
                    sm.cancel(e.to_string())?;
                } else {
                    error!(
                        "Rebuild {} of {} failed ({}): {}",
                        job_id,
                        group.base_name(),
                        e.category(),
                        e
                    );
                    sm.fail(&e)?;
                }
            }
        }
        Ok(sm.into_job())
    }

    async fn rebuild_steps(
        &self,
        sm: &mut JobStateMachine,
        group: &IndexGroup,
        query: Value,
        new_slot: &mut Option<IndexHandle>,
        switched: &mut bool,
    ) -> Result<usize> {
        let current = group.current().await?;
        sm.job_mut().previous_index = current.as_ref().map(|h| h.index_name().to_string());

        let created = group.create_index().await?;
        sm.job_mut().new_index = Some(created.index_name().to_string());
        let destination: &IndexHandle = new_slot.insert(created);

        let documents = match &current {
            Some(source) => {
                let sm_ref = &mut *sm;
                let switched_ref = &mut *switched;
                source
                    .with_lock(move || {
                        self.copy_and_switch(
                            sm_ref,
                            group,
                            Some(source),
                            destination,
                            query,
                            switched_ref,
                        )
                    })
                    .await?
            }
            None => {
                self.copy_and_switch(sm, group, None, destination, query, switched)
                    .await?
            }
        };

        sm.update_stage(RebuildStage::Cleanup)?;
        let cleaned = group.clean().await?;
        sm.job_mut().cleaned = cleaned;
        Ok(documents)
    }

    async fn copy_and_switch(
        &self,
        sm: &mut JobStateMachine,
        group: &IndexGroup,
        source: Option<&IndexHandle>,
        destination: &IndexHandle,
        query: Value,
        switched: &mut bool,
    ) -> Result<usize> {
        let documents = match source {
            Some(source) => self.run(source, destination, query).await?.documents,
            None => {
                info!(
                    "{} has no current generation, nothing to copy",
                    group.base_name()
                );
                0
            }
        };
        destination.commit().await?;

        sm.update_stage(RebuildStage::Recovery)?;
        destination
            .wait_for_recovery(
                self.config.rebuild.recovery_poll_interval(),
                self.config.rebuild.recovery_max_polls,
            )
            .await?;

        sm.update_stage(RebuildStage::Cutover)?;
        self.ensure_not_cancelled("rebuild cancelled before cutover")?;
        group.switch_to(destination).await?;
        *switched = true;
        Ok(documents)
    }
}

/// Match-all query body
pub fn match_all() -> Value {
    json!({"query": {"match_all": {}}})
}

/// Source document of a hit, carrying its stored version as `payload_version`
fn copied_document(hit: SearchHit, preserve_versions: bool) -> Document {
    let version = hit.version;
    let mut document = hit.into_document();
    if preserve_versions {
        if let Some(version) = version {
            document.insert(PAYLOAD_VERSION, version);
        }
    }
    document
}

async fn discard_generation(handle: &IndexHandle) {
    warn!("Deleting unfinished generation {}", handle.index_name());
    if let Err(e) = handle.engine().delete_index(handle.index_name()).await {
        error!(
            "Failed to delete unfinished generation {}: {}",
            handle.index_name(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_copied_document_carries_version() {
        let mut source = Map::new();
        source.insert("link".to_string(), json!("/a"));
        let hit = SearchHit {
            index: "mainstream-1".to_string(),
            doc_type: "edition".to_string(),
            id: "/a".to_string(),
            version: Some(7),
            source,
        };

        let doc = copied_document(hit.clone(), true);
        assert_eq!(doc.payload_version(), Some(7));
        assert_eq!(doc.doc_type(), Some("edition"));

        let doc = copied_document(hit, false);
        assert_eq!(doc.payload_version(), None);
    }
}
