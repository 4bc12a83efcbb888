use indexsync_storage::fields::PAYLOAD_VERSION;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IndexerError, Result};
use crate::presenter;

/// Payload fields echoed in processing logs
const LOGGED_FIELDS: [&str; 6] = [
    "content_id",
    "base_path",
    "document_type",
    "title",
    "update_type",
    "publishing_app",
];

/// One change notification from the publishing stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub payload: Map<String, Value>,
    pub payload_version: Option<u64>,
    /// Routed as a versioned delete instead of a write
    #[serde(default)]
    pub unpublishing: bool,
}

impl ChangeEvent {
    pub fn new(payload: Map<String, Value>, unpublishing: bool) -> Self {
        let payload_version = payload.get(PAYLOAD_VERSION).and_then(Value::as_u64);
        Self {
            payload,
            payload_version,
            unpublishing,
        }
    }

    /// Event from a JSON object payload
    pub fn from_value(payload: Value, unpublishing: bool) -> Result<Self> {
        match payload {
            Value::Object(map) => Ok(Self::new(map, unpublishing)),
            other => Err(IndexerError::validation(format!(
                "event payload must be an object, got {}",
                other
            ))),
        }
    }

    pub fn base_path(&self) -> Option<&str> {
        presenter::base_path(&self.payload)
    }

    pub fn document_type(&self) -> Option<&str> {
        self.payload.get("document_type").and_then(Value::as_str)
    }

    /// Identifying payload fields as compact JSON
    pub fn log_summary(&self) -> String {
        let summary: Map<String, Value> = LOGGED_FIELDS
            .iter()
            .filter_map(|field| {
                self.payload
                    .get(*field)
                    .map(|value| (field.to_string(), value.clone()))
            })
            .collect();
        Value::Object(summary).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_read_from_payload() {
        let event = ChangeEvent::from_value(
            json!({"base_path": "/a", "payload_version": 9, "details": {}}),
            false,
        )
        .unwrap();
        assert_eq!(event.payload_version, Some(9));
        assert_eq!(event.base_path(), Some("/a"));
        assert_eq!(event.log_summary(), r#"{"base_path":"/a"}"#);
    }

    #[test]
    fn test_non_object_payload_rejected() {
        assert!(ChangeEvent::from_value(json!([1, 2]), false).is_err());
    }
}
