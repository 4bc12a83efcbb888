//! Change-event payload to search document

use indexsync_storage::fields::{CONTENT_ID, FORMAT, ID, LINK, ORGANISATIONS, PAYLOAD_VERSION, TYPE};
use indexsync_storage::{Document, VersionType};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::error::{IndexerError, Result};

fn markup_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid markup pattern"))
}

/// Expanded-link type and the field holding its content ids
const CONTENT_ID_LISTS: [(&str, &str); 4] = [
    ("organisations", "organisation_content_ids"),
    ("topics", "topic_content_ids"),
    ("mainstream_browse_pages", "mainstream_browse_page_content_ids"),
    ("taxons", "taxons"),
];

/// Payload fields copied as they are
const COPIED_FIELDS: [&str; 6] = [
    "title",
    "description",
    "publishing_app",
    "rendering_app",
    "public_timestamp",
    "first_published_at",
];

/// Where and at which version a presented document is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentIdentifier {
    pub doc_type: String,
    pub id: String,
    pub version: u64,
    pub version_type: VersionType,
}

/// `base_path` of a payload, `None` when missing or empty
pub fn base_path(payload: &Map<String, Value>) -> Option<&str> {
    payload
        .get("base_path")
        .and_then(Value::as_str)
        .filter(|path| !path.is_empty())
}

/// Presents one change-event payload under an inferred `_type`
pub struct EventPresenter<'a> {
    payload: &'a Map<String, Value>,
    doc_type: String,
}

impl<'a> EventPresenter<'a> {
    pub fn new(payload: &'a Map<String, Value>, doc_type: impl Into<String>) -> Self {
        Self {
            payload,
            doc_type: doc_type.into(),
        }
    }

    /// Rejects payloads without a `base_path`
    pub fn validate(&self) -> Result<&'a str> {
        base_path(self.payload)
            .ok_or_else(|| IndexerError::validation("base_path missing from payload"))
    }

    pub fn payload_version(&self) -> Result<u64> {
        self.payload
            .get(PAYLOAD_VERSION)
            .and_then(Value::as_u64)
            .ok_or_else(|| IndexerError::validation("payload_version missing from payload"))
    }

    pub fn identifier(&self) -> Result<DocumentIdentifier> {
        Ok(DocumentIdentifier {
            doc_type: self.doc_type.clone(),
            id: self.validate()?.to_string(),
            version: self.payload_version()?,
            version_type: VersionType::External,
        })
    }

    fn str_field(&self, field: &str) -> Option<&'a str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    fn details(&self) -> Option<&'a Map<String, Value>> {
        self.payload.get("details").and_then(Value::as_object)
    }

    fn expanded_links(&self, link_type: &str) -> &'a [Value] {
        self.payload
            .get("expanded_links")
            .and_then(|links| links.get(link_type))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn linked_content_ids(&self, link_type: &str) -> Vec<Value> {
        self.expanded_links(link_type)
            .iter()
            .filter_map(|item| item.get(CONTENT_ID).cloned())
            .filter(|id| id.is_string())
            .collect()
    }

    /// Organisation slugs: last segment of each linked base path
    fn organisation_slugs(&self) -> Vec<Value> {
        self.expanded_links("organisations")
            .iter()
            .filter_map(|item| item.get("base_path").and_then(Value::as_str))
            .filter_map(|path| path.rsplit('/').next())
            .filter(|slug| !slug.is_empty())
            .map(|slug| Value::String(slug.to_string()))
            .collect()
    }

    fn is_withdrawn(&self) -> bool {
        self.payload
            .get("withdrawn_notice")
            .and_then(Value::as_object)
            .map_or(false, |notice| !notice.is_empty())
    }

    /// Body text with markup removed
    fn indexable_content(&self) -> Option<String> {
        let details = self.details()?;
        let body = match details.get("body")? {
            Value::String(html) => html.clone(),
            // multi-type bodies: prefer the html rendition
            Value::Array(parts) => parts
                .iter()
                .find(|part| part.get("content_type").and_then(Value::as_str) == Some("text/html"))
                .or_else(|| parts.first())
                .and_then(|part| part.get("content"))
                .and_then(Value::as_str)?
                .to_string(),
            _ => return None,
        };
        let text = markup_pattern().replace_all(&body, " ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    }

    /// Document fields, nulls dropped
    pub fn fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(content_id) = self.str_field(CONTENT_ID) {
            fields.insert(CONTENT_ID.to_string(), content_id.into());
        }
        if let Some(path) = base_path(self.payload) {
            fields.insert(LINK.to_string(), path.into());
        }
        if let Some(document_type) = self.str_field("document_type") {
            fields.insert(FORMAT.to_string(), document_type.into());
            fields.insert("content_store_document_type".to_string(), document_type.into());
        }
        for field in COPIED_FIELDS {
            if let Some(value) = self.payload.get(field).filter(|v| !v.is_null()) {
                fields.insert(field.to_string(), value.clone());
            }
        }
        if let Some(content) = self.indexable_content() {
            fields.insert("indexable_content".to_string(), content.into());
        }
        fields.insert("is_withdrawn".to_string(), self.is_withdrawn().into());

        for (link_type, field) in CONTENT_ID_LISTS {
            let ids = self.linked_content_ids(link_type);
            if !ids.is_empty() {
                fields.insert(field.to_string(), Value::Array(ids));
            }
        }
        let slugs = self.organisation_slugs();
        if !slugs.is_empty() {
            fields.insert(ORGANISATIONS.to_string(), Value::Array(slugs));
        }
        fields
    }

    /// Writable document: fields plus `_type`, `_id` and `payload_version`
    pub fn document(&self) -> Result<Document> {
        let identifier = self.identifier()?;
        let mut document = Document::from_map(self.fields());
        document.insert(TYPE, identifier.doc_type);
        document.insert(ID, identifier.id);
        document.insert(PAYLOAD_VERSION, identifier.version);
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Map<String, Value> {
        json!({
            "base_path": "/vat-rates",
            "content_id": "c-1",
            "document_type": "answer",
            "title": "VAT rates",
            "description": null,
            "publishing_app": "publisher",
            "payload_version": 12,
            "details": {"body": "<p>Standard  rate</p><p>20%</p>"},
            "expanded_links": {
                "organisations": [
                    {"content_id": "org-1", "base_path": "/government/organisations/hmrc"}
                ],
                "taxons": [{"content_id": "tax-1"}, {"title": "no id"}]
            }
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_identifier_is_external() {
        let payload = payload();
        let presenter = EventPresenter::new(&payload, "help_page");
        assert_eq!(
            presenter.identifier().unwrap(),
            DocumentIdentifier {
                doc_type: "help_page".to_string(),
                id: "/vat-rates".to_string(),
                version: 12,
                version_type: VersionType::External,
            }
        );
    }

    #[test]
    fn test_missing_base_path_is_invalid() {
        let payload = Map::new();
        let presenter = EventPresenter::new(&payload, "answer");
        assert!(matches!(presenter.validate(), Err(IndexerError::Validation(_))));
        assert!(presenter.document().is_err());
    }

    #[test]
    fn test_fields() {
        let payload = payload();
        let fields = EventPresenter::new(&payload, "answer").fields();

        assert_eq!(fields["link"], json!("/vat-rates"));
        assert_eq!(fields["format"], json!("answer"));
        assert_eq!(fields["indexable_content"], json!("Standard rate 20%"));
        assert_eq!(fields["is_withdrawn"], json!(false));
        assert_eq!(fields["organisation_content_ids"], json!(["org-1"]));
        assert_eq!(fields["organisations"], json!(["hmrc"]));
        assert_eq!(fields["taxons"], json!(["tax-1"]));
        assert!(!fields.contains_key("description"));
        assert!(!fields.contains_key("topic_content_ids"));
    }

    #[test]
    fn test_document_carries_identity() {
        let payload = payload();
        let doc = EventPresenter::new(&payload, "answer").document().unwrap();
        assert_eq!(doc.doc_type(), Some("answer"));
        assert_eq!(doc.id(), Some("/vat-rates"));
        assert_eq!(doc.payload_version(), Some(12));
    }
}
