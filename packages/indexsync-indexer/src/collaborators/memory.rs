//! In-memory collaborators for tests and embedded runs

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ClassificationService, ExpandedLinks, PopularityLookup, RelationshipService};
use crate::error::{IndexerError, Result};

const RELATIONSHIP_SERVICE: &str = "relationship service";

/// Relationship service backed by maps
#[derive(Default)]
pub struct InMemoryRelationships {
    content_ids: RwLock<HashMap<String, String>>,
    links: RwLock<HashMap<String, ExpandedLinks>>,
    timeouts: RwLock<HashSet<String>>,
    transient_failures: RwLock<HashMap<String, usize>>,
    lookups: AtomicUsize,
    expansions: AtomicUsize,
}

impl InMemoryRelationships {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_id(self, base_path: &str, content_id: &str) -> Self {
        self.content_ids
            .write()
            .insert(base_path.to_string(), content_id.to_string());
        self
    }

    pub fn with_links(self, content_id: &str, links: ExpandedLinks) -> Self {
        self.links.write().insert(content_id.to_string(), links);
        self
    }

    /// Every expansion of `content_id` times out
    pub fn with_timeout(self, content_id: &str) -> Self {
        self.timeouts.write().insert(content_id.to_string());
        self
    }

    /// The next `count` expansions of `content_id` fail transiently
    pub fn with_transient_failures(self, content_id: &str, count: usize) -> Self {
        self.transient_failures
            .write()
            .insert(content_id.to_string(), count);
        self
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn expansion_calls(&self) -> usize {
        self.expansions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelationshipService for InMemoryRelationships {
    async fn lookup_content_id(&self, base_path: &str) -> Result<Option<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.content_ids.read().get(base_path).cloned())
    }

    async fn get_expanded_links(&self, content_id: &str) -> Result<Option<ExpandedLinks>> {
        self.expansions.fetch_add(1, Ordering::SeqCst);

        if self.timeouts.read().contains(content_id) {
            return Err(IndexerError::Timeout(format!(
                "Timeout fetching expanded links for {}",
                content_id
            )));
        }
        {
            let mut failures = self.transient_failures.write();
            if let Some(remaining) = failures.get_mut(content_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(IndexerError::transient_collaborator(
                        RELATIONSHIP_SERVICE,
                        format!("connection reset fetching {}", content_id),
                    ));
                }
            }
        }
        Ok(self.links.read().get(content_id).cloned())
    }
}

/// Fixed popularity scores
#[derive(Default)]
pub struct StaticPopularity {
    scores: HashMap<String, f64>,
    calls: AtomicUsize,
}

impl StaticPopularity {
    pub fn new(scores: HashMap<String, f64>) -> Self {
        Self {
            scores,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PopularityLookup for StaticPopularity {
    async fn lookup_popularities(&self, links: &[String]) -> Result<HashMap<String, f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(links
            .iter()
            .filter_map(|link| self.scores.get(link).map(|score| (link.clone(), *score)))
            .collect())
    }
}

/// Classifies by the payload's `document_type`
pub struct DocumentTypeClassifier {
    indexable: HashSet<String>,
    unavailable: bool,
    calls: AtomicUsize,
}

impl DocumentTypeClassifier {
    pub fn new<I, S>(indexable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            indexable: indexable.into_iter().map(Into::into).collect(),
            unavailable: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call fails with an HTTP 503
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassificationService for DocumentTypeClassifier {
    async fn is_indexable(&self, payload: &Map<String, Value>) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(IndexerError::collaborator(
                "classification service",
                "HTTP 503 Service Unavailable",
            ));
        }
        Ok(payload
            .get("document_type")
            .and_then(Value::as_str)
            .map_or(false, |t| self.indexable.contains(t)))
    }
}
