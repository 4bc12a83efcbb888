use async_trait::async_trait;
use indexsync_storage::{Document, SearchEngine};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::collaborators::{PopularityLookup, RelationshipService};
use crate::config::EnrichmentConfig;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::stages::{BestBetStep, FormatStep, LinksStep, PopularityStep, SelfLinkStep};

/// Analyzer used for best-bet queries
pub const BEST_BET_ANALYZER: &str = "best_bet_stemmed_match";

/// Per-bulk-call context shared by every step
pub struct EnrichmentContext {
    pub engine: Arc<dyn SearchEngine>,
    /// Index name the analyzer runs against
    pub index: String,
    /// Logical name (`mainstream`, `government`, ...)
    pub base_name: String,
    pub is_content_index: bool,
    /// Batch-level popularity scores, filled by [`EnrichmentStep::prefetch`]
    pub popularities: HashMap<String, f64>,
}

impl EnrichmentContext {
    pub fn new(
        engine: Arc<dyn SearchEngine>,
        index: impl Into<String>,
        base_name: impl Into<String>,
        is_content_index: bool,
    ) -> Self {
        Self {
            engine,
            index: index.into(),
            base_name: base_name.into(),
            is_content_index,
            popularities: HashMap::new(),
        }
    }

    /// Tokens of the best-bet analyzer joined by single spaces
    pub async fn analyzed_query(&self, text: &str) -> Result<String> {
        let tokens = self
            .engine
            .analyze(&self.index, BEST_BET_ANALYZER, text)
            .await?;
        Ok(tokens.join(" "))
    }
}

/// Enrichment metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentMetrics {
    pub documents: usize,
    /// Step name to number of documents it changed or inspected
    pub steps_applied: BTreeMap<String, usize>,
    pub duration_ms: u64,
}

/// One enrichment step (pluggable)
#[async_trait]
pub trait EnrichmentStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Precondition: whether this step runs for `doc`
    fn applies_to(&self, doc: &Document, ctx: &EnrichmentContext) -> bool;

    /// Batch-level lookups, run once per bulk call before any document
    async fn prefetch(&self, _docs: &[Document], _ctx: &mut EnrichmentContext) -> Result<()> {
        Ok(())
    }

    async fn enrich(&self, doc: Document, ctx: &EnrichmentContext) -> Result<Document>;
}

/// Ordered list of enrichment steps run before every `index` command
#[derive(Clone, Default)]
pub struct DocumentEnrichmentPipeline {
    steps: Vec<Arc<dyn EnrichmentStep>>,
}

impl DocumentEnrichmentPipeline {
    pub fn new(steps: Vec<Arc<dyn EnrichmentStep>>) -> Self {
        Self { steps }
    }

    /// Popularity, format, links, self-link, best bet
    pub fn standard(
        relationships: Arc<dyn RelationshipService>,
        popularity: Arc<dyn PopularityLookup>,
        config: &EnrichmentConfig,
    ) -> Self {
        Self::new(vec![
            Arc::new(PopularityStep::new(popularity)),
            Arc::new(FormatStep),
            Arc::new(LinksStep::new(
                relationships,
                RetryPolicy::from_enrichment(config),
                config.continue_on_links_timeout,
            )),
            Arc::new(SelfLinkStep),
            Arc::new(BestBetStep),
        ])
    }

    /// Only the steps that need no external collaborator
    pub fn local_only() -> Self {
        Self::new(vec![
            Arc::new(FormatStep),
            Arc::new(SelfLinkStep),
            Arc::new(BestBetStep),
        ])
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Enrich a batch; the context is built per call
    pub async fn prepare_all(
        &self,
        docs: Vec<Document>,
        ctx: &mut EnrichmentContext,
    ) -> Result<(Vec<Document>, EnrichmentMetrics)> {
        let start = Instant::now();
        let mut metrics = EnrichmentMetrics {
            documents: docs.len(),
            ..Default::default()
        };

        for step in &self.steps {
            step.prefetch(&docs, ctx).await?;
        }

        let mut prepared = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut doc = doc;
            for step in &self.steps {
                if step.applies_to(&doc, ctx) {
                    doc = step.enrich(doc, ctx).await?;
                    *metrics
                        .steps_applied
                        .entry(step.name().to_string())
                        .or_default() += 1;
                }
            }
            prepared.push(doc);
        }

        metrics.duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Enriched {} documents for {} in {}ms",
            metrics.documents, ctx.base_name, metrics.duration_ms
        );
        Ok((prepared, metrics))
    }

    /// Enrich one document (no batch-level prefetch beyond this document)
    pub async fn prepare(&self, doc: Document, ctx: &mut EnrichmentContext) -> Result<Document> {
        let (mut docs, _) = self.prepare_all(vec![doc], ctx).await?;
        Ok(docs.pop().unwrap_or_default())
    }
}
