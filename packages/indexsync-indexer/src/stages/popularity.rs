use async_trait::async_trait;
use indexsync_storage::fields::POPULARITY;
use indexsync_storage::Document;
use std::sync::Arc;
use tracing::debug;

use crate::collaborators::PopularityLookup;
use crate::error::Result;
use crate::pipeline::{EnrichmentContext, EnrichmentStep};

/// Sets `popularity` from the batch-level score map (content indices only)
pub struct PopularityStep {
    lookup: Arc<dyn PopularityLookup>,
}

impl PopularityStep {
    pub fn new(lookup: Arc<dyn PopularityLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl EnrichmentStep for PopularityStep {
    fn name(&self) -> &'static str {
        "popularity"
    }

    fn applies_to(&self, _doc: &Document, ctx: &EnrichmentContext) -> bool {
        ctx.is_content_index
    }

    async fn prefetch(&self, docs: &[Document], ctx: &mut EnrichmentContext) -> Result<()> {
        if !ctx.is_content_index {
            return Ok(());
        }
        let links: Vec<String> = docs
            .iter()
            .filter_map(|doc| doc.link().map(str::to_string))
            .collect();
        if links.is_empty() {
            return Ok(());
        }
        ctx.popularities = self.lookup.lookup_popularities(&links).await?;
        debug!(
            "Fetched {} popularity scores for {} links",
            ctx.popularities.len(),
            links.len()
        );
        Ok(())
    }

    async fn enrich(&self, mut doc: Document, ctx: &EnrichmentContext) -> Result<Document> {
        let score = doc
            .link()
            .and_then(|link| ctx.popularities.get(link))
            .copied()
            .unwrap_or(0.0);
        doc.insert(POPULARITY, score);
        Ok(doc)
    }
}
