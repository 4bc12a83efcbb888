use async_trait::async_trait;
use indexsync_storage::Document;

use crate::error::Result;
use crate::pipeline::{EnrichmentContext, EnrichmentStep};

const BEST_BET_TYPE: &str = "best_bet";
const STEMMED_QUERY: &str = "stemmed_query";
const STEMMED_QUERY_AS_TERM: &str = "stemmed_query_as_term";

/// Pads the analyzed best-bet query so it can be matched as a whole term
pub struct BestBetStep;

#[async_trait]
impl EnrichmentStep for BestBetStep {
    fn name(&self) -> &'static str {
        "best_bet"
    }

    fn applies_to(&self, doc: &Document, _ctx: &EnrichmentContext) -> bool {
        doc.doc_type() == Some(BEST_BET_TYPE) && doc.get_str(STEMMED_QUERY).is_some()
    }

    async fn enrich(&self, mut doc: Document, ctx: &EnrichmentContext) -> Result<Document> {
        let Some(query) = doc.get_str(STEMMED_QUERY).map(str::to_string) else {
            return Ok(doc);
        };
        let analyzed = ctx.analyzed_query(&query).await?;
        doc.insert(STEMMED_QUERY_AS_TERM, format!(" {} ", analyzed));
        Ok(doc)
    }
}
