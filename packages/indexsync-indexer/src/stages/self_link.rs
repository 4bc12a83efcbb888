use async_trait::async_trait;
use indexsync_storage::fields::ORGANISATIONS;
use indexsync_storage::Document;
use serde_json::Value;

use crate::error::Result;
use crate::pipeline::{EnrichmentContext, EnrichmentStep};

/// Organisations list themselves in their own `organisations`
pub struct SelfLinkStep;

#[async_trait]
impl EnrichmentStep for SelfLinkStep {
    fn name(&self) -> &'static str {
        "self_link"
    }

    fn applies_to(&self, doc: &Document, ctx: &EnrichmentContext) -> bool {
        ctx.is_content_index && doc.format() == Some("organisation") && doc.content_id().is_some()
    }

    async fn enrich(&self, mut doc: Document, _ctx: &EnrichmentContext) -> Result<Document> {
        let Some(own_id) = doc.content_id().map(str::to_string) else {
            return Ok(doc);
        };

        let mut organisations: Vec<Value> = match doc.remove(ORGANISATIONS) {
            Some(Value::Array(items)) => items,
            Some(Value::String(single)) => vec![Value::String(single)],
            _ => Vec::new(),
        };
        organisations.push(Value::String(own_id));

        let mut deduped: Vec<Value> = Vec::with_capacity(organisations.len());
        for item in organisations {
            if !deduped.contains(&item) {
                deduped.push(item);
            }
        }
        doc.insert(ORGANISATIONS, Value::Array(deduped));
        Ok(doc)
    }
}
