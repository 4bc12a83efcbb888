//! Query subset evaluated by the in-memory engine
//!
//! Supported clauses: `match_all`, `term`, `terms`, `ids`, `exists`, `bool`
//! (`must`, `filter`, `should`, `must_not`). Sorting on `_id`, `_type` or any
//! top-level source field.

use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::domain::SearchHit;
use crate::{Result, StorageError};

/// Borrowed view of one stored document
pub(super) struct DocView<'a> {
    pub doc_type: &'a str,
    pub id: &'a str,
    pub source: &'a Map<String, Value>,
}

impl<'a> DocView<'a> {
    fn values(&self, field: &str) -> Vec<Value> {
        match field {
            "_id" => vec![Value::String(self.id.to_string())],
            "_type" => vec![Value::String(self.doc_type.to_string())],
            _ => match self.source.get(field) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => {
                    items.iter().filter(|v| !v.is_null()).cloned().collect()
                }
                Some(other) => vec![other.clone()],
            },
        }
    }
}

pub(super) fn matches(query: Option<&Value>, doc: &DocView<'_>) -> Result<bool> {
    let query = match query {
        None => return Ok(true),
        Some(q) => q,
    };
    let clause = query
        .as_object()
        .ok_or_else(|| StorageError::invalid_request(format!("query must be an object: {}", query)))?;

    let mut entries = clause.iter();
    let (kind, body) = match (entries.next(), entries.next()) {
        (None, _) => return Ok(true),
        (Some(entry), None) => entry,
        _ => {
            return Err(StorageError::invalid_request(format!(
                "query malformed, expected a single clause: {}",
                query
            )))
        }
    };

    match kind.as_str() {
        "match_all" => Ok(true),
        "term" => {
            let (field, expected) = single_field(kind, body)?;
            let expected = expected.get("value").unwrap_or(expected);
            Ok(doc.values(field).iter().any(|v| v == expected))
        }
        "terms" => {
            let (field, expected) = single_field(kind, body)?;
            let expected = expected.as_array().ok_or_else(|| {
                StorageError::invalid_request(format!("[terms] query for [{}] needs an array", field))
            })?;
            Ok(doc.values(field).iter().any(|v| expected.contains(v)))
        }
        "ids" => {
            let values = body
                .get("values")
                .and_then(Value::as_array)
                .ok_or_else(|| StorageError::invalid_request("[ids] query requires [values]"))?;
            Ok(values.iter().any(|v| v.as_str() == Some(doc.id)))
        }
        "exists" => {
            let field = body
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| StorageError::invalid_request("[exists] query requires [field]"))?;
            Ok(!doc.values(field).is_empty())
        }
        "bool" => matches_bool(body, doc),
        other => Err(StorageError::invalid_request(format!(
            "No query registered for [{}]",
            other
        ))),
    }
}

fn matches_bool(body: &Value, doc: &DocView<'_>) -> Result<bool> {
    let must = clauses(body, "must");
    let filter = clauses(body, "filter");
    let should = clauses(body, "should");
    let must_not = clauses(body, "must_not");

    for q in must.iter().chain(filter.iter()) {
        if !matches(Some(*q), doc)? {
            return Ok(false);
        }
    }
    for q in &must_not {
        if matches(Some(*q), doc)? {
            return Ok(false);
        }
    }
    if !should.is_empty() && must.is_empty() && filter.is_empty() {
        for q in &should {
            if matches(Some(*q), doc)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    Ok(true)
}

fn clauses<'a>(body: &'a Value, key: &str) -> Vec<&'a Value> {
    match body.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
    }
}

fn single_field<'a>(kind: &str, body: &'a Value) -> Result<(&'a str, &'a Value)> {
    let map = body.as_object().filter(|m| m.len() == 1).ok_or_else(|| {
        StorageError::invalid_request(format!("[{}] query requires exactly one field", kind))
    })?;
    map.iter()
        .next()
        .map(|(field, value)| (field.as_str(), value))
        .ok_or_else(|| StorageError::invalid_request(format!("[{}] query is empty", kind)))
}

// ═══════════════════════════════════════════════════════════════════════════
// Sorting
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
struct SortKey {
    field: String,
    descending: bool,
}

pub(super) fn sort_hits(hits: &mut [SearchHit], sort: Option<&Value>) -> Result<()> {
    let keys = match sort {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::Array(items)) => items
            .iter()
            .map(parse_sort_key)
            .collect::<Result<Vec<_>>>()?,
        Some(single) => vec![parse_sort_key(single)?],
    };
    let keys: Vec<SortKey> = keys.into_iter().flatten().collect();
    if keys.is_empty() {
        return Ok(());
    }

    hits.sort_by(|a, b| {
        for key in &keys {
            let ordering = compare_values(sort_value(a, &key.field), sort_value(b, &key.field));
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

/// `None` for `_doc`, which keeps index order
fn parse_sort_key(value: &Value) -> Result<Option<SortKey>> {
    let (field, order) = match value {
        Value::String(field) => (field.as_str(), None),
        Value::Object(map) if map.len() == 1 => {
            let (field, spec) = map
                .iter()
                .next()
                .ok_or_else(|| StorageError::invalid_request("empty sort clause"))?;
            let order = match spec {
                Value::String(order) => Some(order.as_str()),
                Value::Object(options) => options.get("order").and_then(Value::as_str),
                _ => None,
            };
            (field.as_str(), order)
        }
        other => {
            return Err(StorageError::invalid_request(format!(
                "malformed sort clause: {}",
                other
            )))
        }
    };

    if field == "_doc" {
        return Ok(None);
    }
    let descending = match order {
        None | Some("asc") => false,
        Some("desc") => true,
        Some(other) => {
            return Err(StorageError::invalid_request(format!(
                "sort order must be asc or desc, got [{}]",
                other
            )))
        }
    };
    Ok(Some(SortKey {
        field: field.to_string(),
        descending,
    }))
}

fn sort_value<'a>(hit: &'a SearchHit, field: &str) -> Option<SortValue<'a>> {
    match field {
        "_id" => Some(SortValue::Text(&hit.id)),
        "_type" => Some(SortValue::Text(&hit.doc_type)),
        _ => {
            let value = match hit.source.get(field)? {
                Value::Array(items) => items.first()?,
                other => other,
            };
            match value {
                Value::String(s) => Some(SortValue::Text(s)),
                Value::Number(n) => n.as_f64().map(SortValue::Number),
                Value::Bool(b) => Some(SortValue::Number(if *b { 1.0 } else { 0.0 })),
                _ => None,
            }
        }
    }
}

enum SortValue<'a> {
    Text(&'a str),
    Number(f64),
}

/// Missing values sort last
fn compare_values(a: Option<SortValue<'_>>, b: Option<SortValue<'_>>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(SortValue::Text(x)), Some(SortValue::Text(y))) => x.cmp(y),
        (Some(SortValue::Number(x)), Some(SortValue::Number(y))) => {
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(SortValue::Number(_)), Some(SortValue::Text(_))) => Ordering::Less,
        (Some(SortValue::Text(_)), Some(SortValue::Number(_))) => Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn eval(query: Value, doc_type: &str, id: &str, src: &Map<String, Value>) -> bool {
        let doc = DocView {
            doc_type,
            id,
            source: src,
        };
        matches(Some(&query), &doc).unwrap()
    }

    #[test]
    fn test_term_matches_array_elements() {
        let src = source(json!({"organisations": ["hmrc", "dvla"], "format": "answer"}));
        assert!(eval(json!({"term": {"organisations": "dvla"}}), "edition", "/a", &src));
        assert!(eval(json!({"term": {"format": {"value": "answer"}}}), "edition", "/a", &src));
        assert!(!eval(json!({"term": {"format": "guide"}}), "edition", "/a", &src));
    }

    #[test]
    fn test_meta_fields_are_queryable() {
        let src = source(json!({}));
        assert!(eval(json!({"term": {"_type": "edition"}}), "edition", "/a", &src));
        assert!(eval(json!({"ids": {"values": ["/b", "/a"]}}), "edition", "/a", &src));
        assert!(eval(json!({"terms": {"_id": ["/a"]}}), "edition", "/a", &src));
    }

    #[test]
    fn test_bool_combinations() {
        let src = source(json!({"content_id": "abc", "format": "answer"}));
        let query = json!({"bool": {
            "must": {"exists": {"field": "content_id"}},
            "must_not": [{"term": {"format": "guide"}}]
        }});
        assert!(eval(query, "edition", "/a", &src));

        let should_only = json!({"bool": {"should": [
            {"term": {"format": "guide"}},
            {"term": {"format": "manual"}}
        ]}});
        assert!(!eval(should_only, "edition", "/a", &src));
    }

    #[test]
    fn test_unknown_clause_is_rejected() {
        let src = source(json!({}));
        let doc = DocView {
            doc_type: "edition",
            id: "/a",
            source: &src,
        };
        let err = matches(Some(&json!({"fuzzy": {"title": "x"}})), &doc).unwrap_err();
        assert!(err.message.contains("No query registered for [fuzzy]"));
    }

    #[test]
    fn test_sort_by_id_and_missing_last() {
        let hit = |id: &str, src: Value| SearchHit {
            index: "i".to_string(),
            doc_type: "edition".to_string(),
            id: id.to_string(),
            version: None,
            source: source(src),
        };
        let mut hits = vec![
            hit("/c", json!({"rank": 2})),
            hit("/a", json!({})),
            hit("/b", json!({"rank": 1})),
        ];

        sort_hits(&mut hits, Some(&json!([{"_id": "asc"}]))).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["/a", "/b", "/c"]);

        sort_hits(&mut hits, Some(&json!({"rank": {"order": "asc"}}))).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["/b", "/c", "/a"]);
    }
}
