//! Bulk commands and NDJSON payload generation

use indexsync_storage::{BulkOp, Document, StorageError, VersionType};
use serde_json::{json, Map, Value};

use crate::error::{IndexerError, Result};

/// One bulk command, ready to serialize
#[derive(Debug, Clone, PartialEq)]
pub struct BulkCommand {
    pub op: BulkOp,
    pub doc_type: String,
    pub id: String,
    pub version: Option<u64>,
    pub version_type: VersionType,
    /// Source body (`index`/`create`) or partial document (`update`)
    pub body: Option<Map<String, Value>>,
}

impl BulkCommand {
    /// `index` command for a document; `_id` defaults to `link`
    pub fn index(document: &Document) -> Result<Self> {
        Self::with_source(BulkOp::Index, document)
    }

    pub fn create(document: &Document) -> Result<Self> {
        Self::with_source(BulkOp::Create, document)
    }

    pub fn delete(doc_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            op: BulkOp::Delete,
            doc_type: doc_type.into(),
            id: id.into(),
            version: None,
            version_type: VersionType::Internal,
            body: None,
        }
    }

    pub fn update(
        doc_type: impl Into<String>,
        id: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            op: BulkOp::Update,
            doc_type: doc_type.into(),
            id: id.into(),
            version: None,
            version_type: VersionType::Internal,
            body: Some(fields),
        }
    }

    fn with_source(op: BulkOp, document: &Document) -> Result<Self> {
        let doc_type = document
            .doc_type()
            .ok_or_else(|| IndexerError::validation("document is missing _type"))?;
        let id = document
            .id()
            .ok_or_else(|| IndexerError::validation("document is missing both _id and link"))?;
        Ok(Self {
            op,
            doc_type: doc_type.to_string(),
            id: id.to_string(),
            version: None,
            version_type: VersionType::Internal,
            body: Some(document.source()),
        })
    }

    /// Move `payload_version` out of the body into an external action version
    pub fn into_external(mut self) -> Result<Self> {
        let version = self
            .body
            .as_mut()
            .and_then(|body| body.remove("payload_version"))
            .and_then(|v| v.as_u64())
            .or(self.version)
            .ok_or_else(|| {
                IndexerError::validation(format!(
                    "no payload_version for external write of [{}][{}]",
                    self.doc_type, self.id
                ))
            })?;
        self.version = Some(version);
        self.version_type = VersionType::External;
        Ok(self)
    }

    fn action_line(&self) -> Value {
        let mut metadata = Map::new();
        metadata.insert("_type".to_string(), Value::String(self.doc_type.clone()));
        metadata.insert("_id".to_string(), Value::String(self.id.clone()));
        if let Some(version) = self.version {
            metadata.insert("version".to_string(), json!(version));
            metadata.insert(
                "version_type".to_string(),
                Value::String(self.version_type.as_str().to_string()),
            );
        }
        let mut action = Map::new();
        action.insert(self.op.as_str().to_string(), Value::Object(metadata));
        Value::Object(action)
    }

    fn source_line(&self) -> Option<Value> {
        let body = self.body.clone().unwrap_or_default();
        match self.op {
            BulkOp::Delete => None,
            BulkOp::Update => Some(json!({ "doc": body })),
            BulkOp::Index | BulkOp::Create => Some(Value::Object(body)),
        }
    }

    /// Serialized lines for this command, newline terminated
    pub fn to_ndjson(&self) -> Result<String> {
        let mut out = serde_json::to_string(&self.action_line()).map_err(StorageError::from)?;
        out.push('\n');
        if let Some(source) = self.source_line() {
            out.push_str(&serde_json::to_string(&source).map_err(StorageError::from)?);
            out.push('\n');
        }
        Ok(out)
    }
}

/// One request body and the number of commands it carries
#[derive(Debug, Clone, PartialEq)]
pub struct BulkPayload {
    pub body: String,
    pub commands: usize,
}

/// Turns bulk commands into newline-delimited request bodies
pub struct BulkPayloadGenerator {
    max_payload_bytes: usize,
}

impl BulkPayloadGenerator {
    pub fn new(max_payload_bytes: usize) -> Self {
        Self {
            max_payload_bytes: max_payload_bytes.max(1),
        }
    }

    /// All commands in one body
    pub fn generate(commands: &[BulkCommand]) -> Result<String> {
        let mut body = String::new();
        for command in commands {
            body.push_str(&command.to_ndjson()?);
        }
        Ok(body)
    }

    /// Split commands into bodies of at most `max_payload_bytes`
    ///
    /// Order is preserved. A command larger than the budget goes alone.
    pub fn payloads(&self, commands: &[BulkCommand]) -> Result<Vec<BulkPayload>> {
        let mut payloads = Vec::new();
        let mut current = BulkPayload {
            body: String::new(),
            commands: 0,
        };

        for command in commands {
            let lines = command.to_ndjson()?;
            if current.commands > 0 && current.body.len() + lines.len() > self.max_payload_bytes {
                payloads.push(std::mem::replace(
                    &mut current,
                    BulkPayload {
                        body: String::new(),
                        commands: 0,
                    },
                ));
            }
            current.body.push_str(&lines);
            current.commands += 1;
        }
        if current.commands > 0 {
            payloads.push(current);
        }
        Ok(payloads)
    }
}

impl Default for BulkPayloadGenerator {
    fn default() -> Self {
        Self::new(10 * 1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_index_command_ids_default_to_link() {
        let command = BulkCommand::index(&doc(json!({
            "link": "/foo",
            "_type": "edition",
            "title": "Foo"
        })))
        .unwrap();

        let body = BulkPayloadGenerator::generate(&[command]).unwrap();
        assert_eq!(
            body,
            "{\"index\":{\"_id\":\"/foo\",\"_type\":\"edition\"}}\n{\"link\":\"/foo\",\"title\":\"Foo\"}\n"
        );
    }

    #[test]
    fn test_meta_fields_never_enter_the_body() {
        let command = BulkCommand::index(&doc(json!({
            "link": "/foo",
            "_id": "custom",
            "_type": "edition",
            "_version": 4
        })))
        .unwrap();
        assert_eq!(command.id, "custom");
        let body = command.body.unwrap();
        assert_eq!(body.len(), 1);
        assert!(body.contains_key("link"));
    }

    #[test]
    fn test_missing_type_is_rejected() {
        let err = BulkCommand::index(&doc(json!({"link": "/foo"}))).unwrap_err();
        assert!(matches!(err, IndexerError::Validation(_)));
    }

    #[test]
    fn test_external_version_moves_out_of_body() {
        let command = BulkCommand::index(&doc(json!({
            "link": "/foo",
            "_type": "edition",
            "payload_version": 12
        })))
        .unwrap()
        .into_external()
        .unwrap();

        let body = BulkPayloadGenerator::generate(&[command]).unwrap();
        assert_eq!(
            body,
            "{\"index\":{\"_id\":\"/foo\",\"_type\":\"edition\",\"version\":12,\"version_type\":\"external\"}}\n{\"link\":\"/foo\"}\n"
        );
    }

    #[test]
    fn test_external_without_version_is_rejected() {
        let command = BulkCommand::index(&doc(json!({"link": "/foo", "_type": "edition"}))).unwrap();
        assert!(command.into_external().is_err());
    }

    #[test]
    fn test_delete_and_update_lines() {
        let mut fields = Map::new();
        fields.insert("popularity".to_string(), json!(0.5));
        let body = BulkPayloadGenerator::generate(&[
            BulkCommand::delete("edition", "/gone"),
            BulkCommand::update("edition", "/foo", fields),
        ])
        .unwrap();

        assert_eq!(
            body,
            concat!(
                "{\"delete\":{\"_id\":\"/gone\",\"_type\":\"edition\"}}\n",
                "{\"update\":{\"_id\":\"/foo\",\"_type\":\"edition\"}}\n",
                "{\"doc\":{\"popularity\":0.5}}\n",
            )
        );
    }

    #[test]
    fn test_payloads_respect_byte_budget() {
        let commands: Vec<_> = (0..5)
            .map(|i| BulkCommand::delete("edition", format!("/doc-{}", i)))
            .collect();
        let one = commands[0].to_ndjson().unwrap().len();

        let generator = BulkPayloadGenerator::new(one * 2);
        let payloads = generator.payloads(&commands).unwrap();
        assert_eq!(
            payloads.iter().map(|p| p.commands).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        assert!(payloads.iter().all(|p| p.body.len() <= one * 2));

        let tiny = BulkPayloadGenerator::new(1);
        assert_eq!(tiny.payloads(&commands).unwrap().len(), 5);
    }
}
