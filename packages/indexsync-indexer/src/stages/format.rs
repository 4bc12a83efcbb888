use async_trait::async_trait;
use indexsync_storage::fields::FORMAT;
use indexsync_storage::Document;
use serde_json::Value;

use crate::error::Result;
use crate::pipeline::{EnrichmentContext, EnrichmentStep};

/// Defaults `format` to the document's `_type`
pub struct FormatStep;

#[async_trait]
impl EnrichmentStep for FormatStep {
    fn name(&self) -> &'static str {
        "format"
    }

    fn applies_to(&self, doc: &Document, ctx: &EnrichmentContext) -> bool {
        ctx.is_content_index && matches!(doc.get(FORMAT), None | Some(Value::Null))
    }

    async fn enrich(&self, mut doc: Document, _ctx: &EnrichmentContext) -> Result<Document> {
        if let Some(doc_type) = doc.doc_type().map(str::to_string) {
            doc.insert(FORMAT, doc_type);
        }
        Ok(doc)
    }
}
