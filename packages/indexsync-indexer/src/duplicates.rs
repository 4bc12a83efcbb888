//! Removal of documents indexed twice under different `_type`s

use indexsync_storage::fields::{CONTENT_ID, LINK};
use indexsync_storage::SearchHit;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::error::Result;
use crate::index::IndexHandle;

/// Upper bound on documents fetched per id
const MAX_MATCHES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    ContentId,
    Link,
}

impl IdType {
    pub fn field(&self) -> &'static str {
        match self {
            IdType::ContentId => CONTENT_ID,
            IdType::Link => LINK,
        }
    }
}

/// What happened to one id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateReport {
    pub id: String,
    pub deleted: bool,
    pub message: String,
}

/// Deletes the copy of type `type_to_delete` when an id matches several
/// documents and the deletion is unambiguous
pub struct DuplicateDeleter {
    index: IndexHandle,
    type_to_delete: String,
}

impl DuplicateDeleter {
    pub fn new(index: IndexHandle, type_to_delete: impl Into<String>) -> Self {
        Self {
            index,
            type_to_delete: type_to_delete.into(),
        }
    }

    pub async fn call(&self, ids: &[String], id_type: IdType) -> Result<Vec<DuplicateReport>> {
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            let report = self.process(id, id_type).await?;
            if report.deleted {
                info!("{}", report.message);
            } else {
                warn!("{}", report.message);
            }
            reports.push(report);
        }
        Ok(reports)
    }

    async fn process(&self, id: &str, id_type: IdType) -> Result<DuplicateReport> {
        let field = id_type.field();
        let hits = self
            .index
            .search(&json!({
                "query": {"term": {field: id}},
                "size": MAX_MATCHES
            }))
            .await?;

        let skip = |reason: String| DuplicateReport {
            id: id.to_string(),
            deleted: false,
            message: format!("Skipping {} {} {}", field, id, reason),
        };

        if hits.len() < 2 {
            return Ok(skip("as less than 2 results found".to_string()));
        }

        let types: Vec<&str> = hits.iter().map(|hit| hit.doc_type.as_str()).collect();
        let Some(doomed) = hits.iter().find(|hit| hit.doc_type == self.type_to_delete) else {
            return Ok(skip(format!(
                "as type to delete {} not present in {}",
                self.type_to_delete,
                types.join(", ")
            )));
        };
        let survivors: Vec<&SearchHit> = hits
            .iter()
            .filter(|hit| hit.doc_type != self.type_to_delete)
            .collect();

        match id_type {
            IdType::ContentId => {
                let ids: BTreeSet<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
                if ids.len() > 1 {
                    return Ok(skip("as multiple _id's detected".to_string()));
                }
            }
            IdType::Link => {
                let content_ids: BTreeSet<&str> = hits.iter().filter_map(content_id).collect();
                if content_ids.len() > 1 {
                    return Ok(skip("as multiple non-null content_id's detected".to_string()));
                }
                if content_id(doomed).is_some() && survivors.iter().all(|hit| content_id(hit).is_none())
                {
                    return Ok(skip(format!(
                        "as {} is indexed with a valid '_type' but a missing content ID",
                        survivors
                            .iter()
                            .map(|hit| hit.doc_type.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )));
                }
            }
        }

        self.index.delete(&doomed.doc_type, &doomed.id).await?;
        Ok(DuplicateReport {
            id: id.to_string(),
            deleted: true,
            message: format!(
                "Deleted duplicate for {} {} of type {}",
                field, id, self.type_to_delete
            ),
        })
    }
}

fn content_id(hit: &SearchHit) -> Option<&str> {
    hit.source
        .get(CONTENT_ID)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}
