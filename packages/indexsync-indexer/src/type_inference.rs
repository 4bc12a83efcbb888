//! `_type` of the document an event applies to

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{IndexerError, Result};
use crate::index::IndexHandle;

/// Document types announcing that content was withdrawn
pub const UNPUBLISHING_TYPES: [&str; 4] = ["gone", "redirect", "substitute", "vanish"];

pub fn is_unpublishing_type(document_type: &str) -> bool {
    UNPUBLISHING_TYPES.contains(&document_type)
}

/// Resolves the `_type` for an event payload
///
/// Unpublishing types describe the replacement, not the withdrawn content,
/// so their `_type` is taken from the stored document at the same path.
#[derive(Clone)]
pub struct DocumentTypeInferer {
    index: IndexHandle,
}

impl DocumentTypeInferer {
    pub fn new(index: IndexHandle) -> Self {
        Self { index }
    }

    /// `None` when the payload is an unpublishing type and nothing is stored
    /// at `base_path`
    pub async fn infer(&self, payload: &Map<String, Value>, base_path: &str) -> Result<Option<String>> {
        let document_type = payload
            .get("document_type")
            .and_then(Value::as_str)
            .ok_or_else(|| IndexerError::validation("document_type missing from payload"))?;

        if !is_unpublishing_type(document_type) {
            return Ok(Some(document_type.to_string()));
        }

        let existing = self.index.get_hit(None, base_path).await?;
        match existing {
            Some(hit) => Ok(Some(hit.doc_type)),
            None => {
                debug!(
                    "No document at {} in {} for {} event",
                    base_path,
                    self.index.index_name(),
                    document_type
                );
                Ok(None)
            }
        }
    }
}
