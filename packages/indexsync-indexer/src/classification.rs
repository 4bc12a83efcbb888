//! TTL cache in front of the classification service

use moka::future::Cache;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::collaborators::ClassificationService;
use crate::config::IngestConfig;
use crate::error::Result;

/// Caches `is_indexable` answers by the payload's `document_type`
///
/// Answers go stale after the TTL, so a format newly marked indexable takes
/// effect without a restart.
#[derive(Clone)]
pub struct ClassificationCache {
    service: Arc<dyn ClassificationService>,
    /// moka cache (TTL)
    cache: Cache<String, bool>,
}

impl ClassificationCache {
    pub fn new(service: Arc<dyn ClassificationService>, ttl: Duration, max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { service, cache }
    }

    pub fn from_config(service: Arc<dyn ClassificationService>, config: &IngestConfig) -> Self {
        Self::new(
            service,
            config.classification_ttl(),
            config.classification_cache_capacity,
        )
    }

    fn key(payload: &Map<String, Value>) -> String {
        payload
            .get("document_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    pub async fn is_indexable(&self, payload: &Map<String, Value>) -> Result<bool> {
        let key = Self::key(payload);
        if let Some(indexable) = self.cache.get(&key).await {
            return Ok(indexable);
        }

        let indexable = self.service.is_indexable(payload).await?;
        debug!("Classified document type {:?}: indexable={}", key, indexable);
        self.cache.insert(key, indexable).await;
        Ok(indexable)
    }

    /// Drop every cached answer
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::memory::DocumentTypeClassifier;
    use serde_json::json;

    fn payload(document_type: &str) -> Map<String, Value> {
        json!({"base_path": "/a", "document_type": document_type})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_answers_are_cached_per_document_type() {
        let service = Arc::new(DocumentTypeClassifier::new(["answer"]));
        let cache = ClassificationCache::new(service.clone(), Duration::from_secs(300), 100);

        assert!(cache.is_indexable(&payload("answer")).await.unwrap());
        assert!(cache.is_indexable(&payload("answer")).await.unwrap());
        assert!(!cache.is_indexable(&payload("guide")).await.unwrap());
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn test_clear_forces_lookup() {
        let service = Arc::new(DocumentTypeClassifier::new(["answer"]));
        let cache = ClassificationCache::new(service.clone(), Duration::from_secs(300), 100);

        cache.is_indexable(&payload("answer")).await.unwrap();
        cache.clear().await;
        cache.is_indexable(&payload("answer")).await.unwrap();
        assert_eq!(service.calls(), 2);
    }
}
