use async_trait::async_trait;
use indexsync_storage::Document;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use tracing::{error, warn};

use crate::collaborators::{ExpandedLinks, RelationshipService};
use crate::error::Result;
use crate::pipeline::{EnrichmentContext, EnrichmentStep};
use crate::retry::RetryPolicy;

/// Link type in the relationship service to document field
const TAGGINGS: [(&str, &str); 4] = [
    ("topics", "specialist_sectors"),
    ("mainstream_browse_pages", "mainstream_browse_pages"),
    ("organisations", "organisations"),
    ("taxons", "taxons"),
];

fn external_link() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^https?://").expect("valid external link pattern"))
}

/// Merges expanded-link content ids into content documents
///
/// External links (full URLs) are never expanded. Documents whose path or
/// content id the relationship service does not know pass through unchanged.
pub struct LinksStep {
    relationships: Arc<dyn RelationshipService>,
    retry: RetryPolicy,
    continue_on_timeout: bool,
}

impl LinksStep {
    pub fn new(
        relationships: Arc<dyn RelationshipService>,
        retry: RetryPolicy,
        continue_on_timeout: bool,
    ) -> Self {
        Self {
            relationships,
            retry,
            continue_on_timeout,
        }
    }

    async fn find_content_id(&self, doc: &Document) -> Result<Option<String>> {
        if let Some(content_id) = doc.content_id() {
            return Ok(Some(content_id.to_string()));
        }
        let Some(link) = doc.link() else {
            return Ok(None);
        };
        self.retry
            .run("content id lookup", || self.relationships.lookup_content_id(link))
            .await
    }

    async fn find_links(&self, content_id: &str) -> Result<Option<ExpandedLinks>> {
        self.retry
            .run("expanded links lookup", || {
                self.relationships.get_expanded_links(content_id)
            })
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!("Timeout fetching expanded links for {}", content_id);
                }
                e
            })
    }

    async fn expand(&self, doc: &Document) -> Result<Option<Map<String, Value>>> {
        let Some(content_id) = self.find_content_id(doc).await? else {
            return Ok(None);
        };
        let Some(links) = self.find_links(&content_id).await? else {
            return Ok(None);
        };
        Ok(Some(taggings_with_content_ids(&links)))
    }
}

fn taggings_with_content_ids(links: &ExpandedLinks) -> Map<String, Value> {
    TAGGINGS
        .iter()
        .map(|(link_type, field)| {
            let ids = links
                .get(*link_type)
                .map(|items| {
                    items
                        .iter()
                        .map(|item| Value::String(item.content_id.clone()))
                        .collect()
                })
                .unwrap_or_default();
            (field.to_string(), Value::Array(ids))
        })
        .collect()
}

#[async_trait]
impl EnrichmentStep for LinksStep {
    fn name(&self) -> &'static str {
        "links"
    }

    fn applies_to(&self, doc: &Document, ctx: &EnrichmentContext) -> bool {
        ctx.is_content_index && !doc.link().map_or(false, |link| external_link().is_match(link))
    }

    async fn enrich(&self, mut doc: Document, _ctx: &EnrichmentContext) -> Result<Document> {
        match self.expand(&doc).await {
            Ok(Some(taggings)) => {
                for (field, ids) in taggings {
                    doc.insert(field, ids);
                }
                Ok(doc)
            }
            Ok(None) => Ok(doc),
            Err(e) if e.is_timeout() && self.continue_on_timeout => {
                warn!(
                    "Indexing {} without expanded links: {}",
                    doc.link().unwrap_or("<no link>"),
                    e
                );
                Ok(doc)
            }
            Err(e) => Err(e),
        }
    }
}
