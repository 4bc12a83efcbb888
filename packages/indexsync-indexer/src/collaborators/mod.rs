//! Ports for the external services the indexer consults
//!
//! - `RelationshipService`: content ids and expanded links by path
//! - `PopularityLookup`: popularity scores by link
//! - `ClassificationService`: whether an event payload belongs in the index

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::error::Result;

/// One linked content item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkedItem {
    pub content_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl LinkedItem {
    pub fn new(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            ..Default::default()
        }
    }
}

/// Link type (`organisations`, `topics`, ...) to linked items
pub type ExpandedLinks = BTreeMap<String, Vec<LinkedItem>>;

#[async_trait]
pub trait RelationshipService: Send + Sync {
    /// Content id published at `base_path`, `None` when unknown
    async fn lookup_content_id(&self, base_path: &str) -> Result<Option<String>>;

    /// Expanded links of `content_id`, `None` when unknown
    async fn get_expanded_links(&self, content_id: &str) -> Result<Option<ExpandedLinks>>;
}

#[async_trait]
pub trait PopularityLookup: Send + Sync {
    /// Popularity per link; links without a score are absent from the map
    async fn lookup_popularities(&self, links: &[String]) -> Result<HashMap<String, f64>>;
}

#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn is_indexable(&self, payload: &Map<String, Value>) -> Result<bool>;
}
