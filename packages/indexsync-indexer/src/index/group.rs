//! Generations of one logical index behind an alias

use chrono::Utc;
use indexsync_storage::{AliasAction, SearchEngine};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{strip_alias_from_index_name, IndexHandle};
use crate::config::IndexerConfig;
use crate::error::Result;
use crate::metrics::BulkMetrics;
use crate::pipeline::DocumentEnrichmentPipeline;

/// Logical index `base_name` and its physical generations
///
/// At most one generation holds the alias. Older generations stay until
/// [`IndexGroup::clean`].
#[derive(Clone)]
pub struct IndexGroup {
    engine: Arc<dyn SearchEngine>,
    base_name: String,
    config: Arc<IndexerConfig>,
    pipeline: DocumentEnrichmentPipeline,
    metrics: Option<BulkMetrics>,
}

impl IndexGroup {
    pub fn new(
        engine: Arc<dyn SearchEngine>,
        base_name: impl Into<String>,
        config: Arc<IndexerConfig>,
    ) -> Self {
        Self {
            engine,
            base_name: base_name.into(),
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

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Handle on `index_name` sharing this group's pipeline and metrics
    pub fn handle(&self, index_name: impl Into<String>) -> IndexHandle {
        let handle = IndexHandle::new(self.engine.clone(), index_name, self.config.clone())
            .with_pipeline(self.pipeline.clone());
        match &self.metrics {
            Some(metrics) => handle.with_metrics(metrics.clone()),
            None => handle,
        }
    }

    /// Handle addressed by the alias itself
    pub fn alias(&self) -> IndexHandle {
        self.handle(self.base_name.clone())
    }

    fn generation_name(&self) -> String {
        format!(
            "{}-{}-{}",
            self.base_name,
            Utc::now().format("%Y-%m-%dt%H:%M:%Sz"),
            Uuid::new_v4()
        )
    }

    /// New physical generation with the configured settings and mappings
    pub async fn create_index(&self) -> Result<IndexHandle> {
        let name = self.generation_name();
        self.engine
            .create_index(&name, &self.config.indices.create_body())
            .await?;
        info!("Created index {}", name);
        Ok(self.handle(name))
    }

    pub async fn current_real_name(&self) -> Result<Option<String>> {
        self.alias().resolve_real_name().await
    }

    /// Handle on the aliased generation, `None` when there is no alias
    pub async fn current(&self) -> Result<Option<IndexHandle>> {
        Ok(self
            .current_real_name()
            .await?
            .map(|name| self.handle(name)))
    }

    async fn aliased_names(&self) -> Result<BTreeSet<String>> {
        match self.engine.get_aliases(&self.base_name).await {
            Ok(aliases) => Ok(aliases
                .into_iter()
                .filter(|(_, names)| names.iter().any(|alias| alias == &self.base_name))
                .map(|(index, _)| index)
                .collect()),
            Err(e) if e.is_not_found() => Ok(BTreeSet::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Point the alias at `handle` in one atomic alias update
    pub async fn switch_to(&self, handle: &IndexHandle) -> Result<()> {
        let target = handle.index_name().to_string();
        let mut actions: Vec<AliasAction> = self
            .aliased_names()
            .await?
            .into_iter()
            .filter(|name| name != &target)
            .map(|index| AliasAction::Remove {
                index,
                alias: self.base_name.clone(),
            })
            .collect();
        actions.push(AliasAction::Add {
            index: target.clone(),
            alias: self.base_name.clone(),
        });

        self.engine.update_aliases(&actions).await?;
        info!("Switched {} to {}", self.base_name, target);
        Ok(())
    }

    /// Every physical generation of this logical index
    pub async fn index_names(&self) -> Result<Vec<String>> {
        let prefix = format!("{}-", self.base_name);
        Ok(self
            .engine
            .list_indices(&prefix)
            .await?
            .into_iter()
            .filter(|name| strip_alias_from_index_name(name) == self.base_name)
            .collect())
    }

    /// Delete every generation not holding the alias
    pub async fn clean(&self) -> Result<Vec<String>> {
        let aliased = self.aliased_names().await?;
        let mut deleted = Vec::new();
        for name in self.index_names().await? {
            if aliased.contains(&name) {
                continue;
            }
            info!("Deleting old index {}", name);
            self.engine.delete_index(&name).await?;
            deleted.push(name);
        }
        Ok(deleted)
    }
}
