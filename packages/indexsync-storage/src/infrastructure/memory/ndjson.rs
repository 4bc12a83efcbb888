//! Bulk body parsing
//!
//! Action line `{"<op>": {metadata}}`, followed by a source line for every op
//! except `delete`. Blank lines are skipped.

use serde_json::{Map, Value};

use crate::domain::{BulkOp, VersionType};
use crate::{Result, StorageError};

#[derive(Debug, Clone)]
pub(super) struct BulkCommand {
    pub op: BulkOp,
    pub index: Option<String>,
    pub doc_type: Option<String>,
    pub id: Option<String>,
    pub version: Option<u64>,
    pub version_type: VersionType,
    pub source: Option<Map<String, Value>>,
}

pub(super) fn parse_bulk_body(body: &str) -> Result<Vec<BulkCommand>> {
    let mut lines = body.lines().filter(|line| !line.trim().is_empty());
    let mut commands = Vec::new();

    while let Some(action_line) = lines.next() {
        let mut command = parse_action(action_line)?;
        if command.op.has_source() {
            let source_line = lines.next().ok_or_else(|| {
                StorageError::invalid_request(format!(
                    "Validation Failed: 1: source is missing for [{}] action;",
                    command.op
                ))
            })?;
            match serde_json::from_str::<Value>(source_line)? {
                Value::Object(map) => command.source = Some(map),
                other => {
                    return Err(StorageError::invalid_request(format!(
                        "source must be a JSON object, got: {}",
                        other
                    )))
                }
            }
        }
        commands.push(command);
    }

    if commands.is_empty() {
        return Err(StorageError::invalid_request(
            "Validation Failed: 1: no requests added;",
        ));
    }
    Ok(commands)
}

fn parse_action(line: &str) -> Result<BulkCommand> {
    let value: Value = serde_json::from_str(line)?;
    let action = value.as_object().filter(|map| map.len() == 1).ok_or_else(|| {
        StorageError::invalid_request(format!("Malformed action/metadata line: {}", line))
    })?;

    let (op, metadata) = action
        .iter()
        .next()
        .ok_or_else(|| StorageError::invalid_request("empty action line"))?;
    let op = BulkOp::from_str(op)?;
    let metadata = metadata.as_object().ok_or_else(|| {
        StorageError::invalid_request(format!("Malformed action/metadata line: {}", line))
    })?;

    let version = match ["version", "_version"]
        .iter()
        .find_map(|key| metadata.get(*key))
    {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_u64().ok_or_else(|| {
            StorageError::invalid_request(format!("version must be a non-negative integer: {}", v))
        })?),
    };

    let version_type = match text_field(metadata, &["version_type", "_version_type"]).as_deref() {
        None | Some("internal") => VersionType::Internal,
        Some("external") | Some("external_gt") => VersionType::External,
        Some(other) => {
            return Err(StorageError::invalid_request(format!(
                "No version type match [{}]",
                other
            )))
        }
    };

    Ok(BulkCommand {
        op,
        index: text_field(metadata, &["_index"]),
        doc_type: text_field(metadata, &["_type"]),
        id: text_field(metadata, &["_id"]),
        version,
        version_type,
        source: None,
    })
}

fn text_field(metadata: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| metadata.get(*key))
        .and_then(Value::as_str)
        .map(str::to_string)
}
