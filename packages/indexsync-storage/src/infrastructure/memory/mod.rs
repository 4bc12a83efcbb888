//! In-Memory Search Engine
//!
//! Single-process implementation of [`SearchEngine`]. Used by every test in
//! the workspace and by embedded runs that do not need a cluster.
//!
//! Behaviour mirrors a real engine where the indexer depends on it:
//! - writes are visible to `get_document` immediately, but to `search` and
//!   scrolls only after `refresh`
//! - `index.blocks.write` rejects every write with a 403 cluster block
//! - external versioning applies a write only when its version is strictly
//!   greater than the stored one
//! - scroll pages hold at most `page_size` hits per shard
//! - deletes leave no tombstone, so a later write starts a new version lineage

mod analysis;
mod ndjson;
mod query;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    AliasAction, BulkItem, BulkItemError, BulkOp, BulkResponse, DeleteResponse, RecoveryStage,
    ScrollPage, SearchEngine, SearchHit, SearchResponse, ShardRecovery, VersionType,
};
use crate::{Result, StorageError};

use ndjson::BulkCommand;
use query::DocView;

const DEFAULT_SHARDS: u32 = 5;
const DEFAULT_SEARCH_SIZE: usize = 10;
const WRITE_BLOCK_REASON: &str =
    "ClusterBlockException[blocked by: [FORBIDDEN/8/index write (api)];]";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DocKey {
    doc_type: String,
    id: String,
}

#[derive(Debug, Clone)]
struct StoredDoc {
    version: u64,
    source: Map<String, Value>,
}

#[derive(Debug)]
struct IndexState {
    settings: BTreeMap<String, Value>,
    shards: u32,
    write_blocked: bool,
    closed: bool,
    /// Realtime view
    live: BTreeMap<DocKey, StoredDoc>,
    /// View as of the last refresh
    visible: BTreeMap<DocKey, StoredDoc>,
    recovery_stage: RecoveryStage,
}

impl IndexState {
    fn new(settings: &Value) -> Self {
        let mut state = Self {
            settings: BTreeMap::new(),
            shards: DEFAULT_SHARDS,
            write_blocked: false,
            closed: false,
            live: BTreeMap::new(),
            visible: BTreeMap::new(),
            recovery_stage: RecoveryStage::Done,
        };
        state.apply_settings(settings);
        state
    }

    fn apply_settings(&mut self, settings: &Value) {
        self.settings.extend(normalized_settings(settings));
        if let Some(shards) = self.settings.get("number_of_shards").and_then(as_u64_lenient) {
            self.shards = (shards as u32).max(1);
        }
        if let Some(blocked) = self.settings.get("blocks.write").and_then(as_bool_lenient) {
            self.write_blocked = blocked;
        }
    }

    fn hit(&self, index: &str, key: &DocKey, doc: &StoredDoc) -> SearchHit {
        SearchHit {
            index: index.to_string(),
            doc_type: key.doc_type.clone(),
            id: key.id.clone(),
            version: Some(doc.version),
            source: doc.source.clone(),
        }
    }

    fn ensure_open(&self, index: &str) -> Result<()> {
        if self.closed {
            return Err(StorageError::new(
                crate::ErrorKind::Forbidden,
                format!("IndexClosedException[[{}] closed]", index),
            )
            .with_error_type("index_closed_exception"));
        }
        Ok(())
    }

    fn ensure_writable(&self, index: &str) -> Result<()> {
        self.ensure_open(index)?;
        if self.write_blocked {
            return Err(StorageError::write_blocked(WRITE_BLOCK_REASON));
        }
        Ok(())
    }

    fn apply(&mut self, index: &str, command: BulkCommand) -> BulkItem {
        let op = command.op;
        let mut item = BulkItem {
            op,
            index: index.to_string(),
            doc_type: command.doc_type.clone().unwrap_or_default(),
            id: command.id.clone().unwrap_or_default(),
            status: 200,
            version: None,
            error: None,
        };

        if let Err(err) = self.ensure_writable(index) {
            return failed(item, 403, err.error_type, err.message);
        }
        if command.doc_type.is_none() {
            return failed(
                item,
                400,
                Some("action_request_validation_exception".to_string()),
                "Validation Failed: 1: type is missing;".to_string(),
            );
        }
        if command.id.is_none() {
            if matches!(op, BulkOp::Delete | BulkOp::Update) {
                return failed(
                    item,
                    400,
                    Some("action_request_validation_exception".to_string()),
                    "Validation Failed: 1: id is missing;".to_string(),
                );
            }
            item.id = Uuid::new_v4().simple().to_string();
        }

        let key = DocKey {
            doc_type: item.doc_type.clone(),
            id: item.id.clone(),
        };
        let current = self.live.get(&key).map(|doc| doc.version);

        match op {
            BulkOp::Index | BulkOp::Create => {
                if op == BulkOp::Create && current.is_some() {
                    let reason = format!(
                        "DocumentAlreadyExistsException[[{}][{}]: document already exists]",
                        key.doc_type, key.id
                    );
                    return failed(
                        item,
                        409,
                        Some("document_already_exists_exception".to_string()),
                        reason,
                    );
                }
                let version =
                    match next_version(&key, command.version_type, command.version, current) {
                        Ok(version) => version,
                        Err((status, error)) => return failed(item, status, error.error_type, error.reason),
                    };
                self.live.insert(
                    key,
                    StoredDoc {
                        version,
                        source: command.source.unwrap_or_default(),
                    },
                );
                item.status = if current.is_some() { 200 } else { 201 };
                item.version = Some(version);
            }
            BulkOp::Update => {
                let stored = match self.live.get_mut(&key) {
                    Some(stored) => stored,
                    None => {
                        let reason = format!(
                            "DocumentMissingException[[{}][{}]: document missing]",
                            key.doc_type, key.id
                        );
                        return failed(item, 404, Some("document_missing_exception".to_string()), reason);
                    }
                };
                if let Err((status, error)) =
                    next_version(&key, command.version_type, command.version, current)
                {
                    return failed(item, status, error.error_type, error.reason);
                }
                let partial = command
                    .source
                    .and_then(|mut body| body.remove("doc"))
                    .and_then(|doc| match doc {
                        Value::Object(fields) => Some(fields),
                        _ => None,
                    });
                match partial {
                    Some(fields) => {
                        stored.source.extend(fields);
                        stored.version += 1;
                        item.version = Some(stored.version);
                    }
                    None => {
                        return failed(
                            item,
                            400,
                            Some("action_request_validation_exception".to_string()),
                            "Validation Failed: 1: script or doc is missing;".to_string(),
                        )
                    }
                }
            }
            BulkOp::Delete => match current {
                None => item.status = 404,
                Some(_) => {
                    match next_version(&key, command.version_type, command.version, current) {
                        Ok(version) => {
                            self.live.remove(&key);
                            item.version = Some(version);
                        }
                        Err((status, error)) => {
                            return failed(item, status, error.error_type, error.reason)
                        }
                    }
                }
            },
        }
        item
    }
}

fn failed(mut item: BulkItem, status: u16, error_type: Option<String>, reason: String) -> BulkItem {
    item.status = status;
    item.error = Some(BulkItemError { error_type, reason });
    item
}

/// Version a write would carry, or the `(status, error)` that rejects it
fn next_version(
    key: &DocKey,
    version_type: VersionType,
    provided: Option<u64>,
    current: Option<u64>,
) -> std::result::Result<u64, (u16, BulkItemError)> {
    let conflict = |provided: u64| {
        let current = current.map_or_else(|| "-1".to_string(), |v| v.to_string());
        (
            409,
            BulkItemError {
                error_type: Some("version_conflict_engine_exception".to_string()),
                reason: format!(
                    "VersionConflictEngineException[[{}][{}]: version conflict, current [{}], provided [{}]]",
                    key.doc_type, key.id, current, provided
                ),
            },
        )
    };

    match version_type {
        VersionType::External => {
            let provided = provided.ok_or_else(|| {
                (
                    400,
                    BulkItemError {
                        error_type: Some("action_request_validation_exception".to_string()),
                        reason: "Validation Failed: 1: version is missing for external versioning;"
                            .to_string(),
                    },
                )
            })?;
            match current {
                Some(stored) if stored >= provided => Err(conflict(provided)),
                _ => Ok(provided),
            }
        }
        VersionType::Internal => match provided {
            Some(expected) if current != Some(expected) => Err(conflict(expected)),
            _ => Ok(current.map_or(1, |v| v + 1)),
        },
    }
}

#[derive(Debug, Default)]
struct EngineState {
    indices: BTreeMap<String, IndexState>,
    /// alias -> physical indices
    aliases: BTreeMap<String, BTreeSet<String>>,
}

impl EngineState {
    fn aliases_of(&self, index: &str) -> Vec<String> {
        self.aliases
            .iter()
            .filter(|(_, targets)| targets.contains(index))
            .map(|(alias, _)| alias.clone())
            .collect()
    }

    /// Resolve a name that must address exactly one physical index
    fn resolve_single(&self, name: &str) -> Result<String> {
        if self.indices.contains_key(name) {
            return Ok(name.to_string());
        }
        match self.aliases.get(name) {
            Some(targets) if targets.len() == 1 => Ok(targets.iter().next().cloned().unwrap_or_default()),
            Some(targets) if targets.len() > 1 => Err(StorageError::invalid_request(format!(
                "Alias [{}] has more than one indices associated with it [{:?}], can't execute a single index op",
                name, targets
            ))),
            _ => Err(StorageError::index_not_found(name)),
        }
    }

    fn resolve_many(&self, names: &[String]) -> Result<Vec<String>> {
        let mut physical = BTreeSet::new();
        for name in names {
            if self.indices.contains_key(name) {
                physical.insert(name.clone());
            } else if let Some(targets) = self.aliases.get(name) {
                physical.extend(targets.iter().cloned());
            } else {
                return Err(StorageError::index_not_found(name.as_str()));
            }
        }
        Ok(physical.into_iter().collect())
    }

    fn index(&self, name: &str) -> Result<&IndexState> {
        self.indices
            .get(name)
            .ok_or_else(|| StorageError::index_not_found(name))
    }

    fn index_mut(&mut self, name: &str) -> Result<&mut IndexState> {
        self.indices
            .get_mut(name)
            .ok_or_else(|| StorageError::index_not_found(name))
    }

    /// Matching, sorted hits over the refreshed view of `names`
    fn collect_hits(&self, names: &[String], body: &Value) -> Result<(Vec<SearchHit>, u32)> {
        let physical = self.resolve_many(names)?;
        let query = body.get("query");
        let mut hits = Vec::new();
        let mut shards = 0;

        for name in &physical {
            let index = self.index(name)?;
            index.ensure_open(name)?;
            shards += index.shards;
            for (key, doc) in &index.visible {
                let view = DocView {
                    doc_type: &key.doc_type,
                    id: &key.id,
                    source: &doc.source,
                };
                if query::matches(query, &view)? {
                    hits.push(index.hit(name, key, doc));
                }
            }
        }

        query::sort_hits(&mut hits, body.get("sort"))?;
        Ok((hits, shards.max(1)))
    }
}

#[derive(Debug)]
struct ScrollContext {
    remaining: VecDeque<SearchHit>,
    page_size: usize,
    expires_at: Instant,
}

impl ScrollContext {
    fn next_page(&mut self) -> Vec<SearchHit> {
        let take = self.page_size.min(self.remaining.len());
        self.remaining.drain(..take).collect()
    }
}

/// In-memory engine
///
/// Cloning is cheap; clones share state.
#[derive(Clone, Default)]
pub struct InMemorySearchEngine {
    state: Arc<RwLock<EngineState>>,
    scrolls: Arc<DashMap<String, ScrollContext>>,
}

impl InMemorySearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the recovery stage reported for every shard of `index`
    pub fn set_recovery_stage(&self, index: &str, stage: RecoveryStage) -> Result<()> {
        let mut state = self.state.write();
        let name = state.resolve_single(index)?;
        state.index_mut(&name)?.recovery_stage = stage;
        Ok(())
    }

    /// Number of live documents in `index`, refreshed or not
    pub fn document_count(&self, index: &str) -> Result<usize> {
        let state = self.state.read();
        let name = state.resolve_single(index)?;
        Ok(state.index(&name)?.live.len())
    }

    pub fn is_write_blocked(&self, index: &str) -> Result<bool> {
        let state = self.state.read();
        let name = state.resolve_single(index)?;
        Ok(state.index(&name)?.write_blocked)
    }

    /// Scroll contexts still held open
    pub fn open_scroll_count(&self) -> usize {
        self.purge_expired_scrolls();
        self.scrolls.len()
    }

    fn purge_expired_scrolls(&self) {
        let now = Instant::now();
        self.scrolls.retain(|_, ctx| ctx.expires_at > now);
    }
}

#[async_trait]
impl SearchEngine for InMemorySearchEngine {
    async fn get_aliases(&self, name: &str) -> Result<BTreeMap<String, Vec<String>>> {
        let state = self.state.read();
        let physical: Vec<String> = if state.indices.contains_key(name) {
            vec![name.to_string()]
        } else if let Some(targets) = state.aliases.get(name) {
            targets.iter().cloned().collect()
        } else {
            return Err(StorageError::index_not_found(name));
        };

        Ok(physical
            .into_iter()
            .map(|index| {
                let aliases = state.aliases_of(&index);
                (index, aliases)
            })
            .collect())
    }

    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        Ok(state
            .indices
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn create_index(&self, name: &str, settings: &Value) -> Result<()> {
        let mut state = self.state.write();
        if state.indices.contains_key(name) {
            return Err(StorageError::invalid_request(format!(
                "IndexAlreadyExistsException[[{}] already exists]",
                name
            ))
            .with_error_type("index_already_exists_exception"));
        }
        if state.aliases.contains_key(name) {
            return Err(StorageError::invalid_request(format!(
                "InvalidIndexNameException[[{}] an alias with the same name already exists]",
                name
            ))
            .with_error_type("invalid_index_name_exception"));
        }
        state.indices.insert(name.to_string(), IndexState::new(settings));
        debug!(index = name, "created index");
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.indices.remove(name).is_none() {
            return Err(StorageError::index_not_found(name));
        }
        for targets in state.aliases.values_mut() {
            targets.remove(name);
        }
        state.aliases.retain(|_, targets| !targets.is_empty());
        debug!(index = name, "deleted index");
        Ok(())
    }

    async fn close_index(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        let physical = state.resolve_single(name)?;
        state.index_mut(&physical)?.closed = true;
        debug!(index = %physical, "closed index");
        Ok(())
    }

    async fn put_settings(&self, index: &str, settings: &Value) -> Result<()> {
        let mut state = self.state.write();
        for name in state.resolve_many(&[index.to_string()])? {
            state.index_mut(&name)?.apply_settings(settings);
        }
        Ok(())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        let mut state = self.state.write();

        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    state.index(index)?;
                    if state.indices.contains_key(alias) {
                        return Err(StorageError::invalid_request(format!(
                            "InvalidAliasNameException[[{}] an index exists with the same name as the alias]",
                            alias
                        ))
                        .with_error_type("invalid_alias_name_exception"));
                    }
                }
                AliasAction::Remove { index, alias } => {
                    state.index(index)?;
                    let present = state
                        .aliases
                        .get(alias)
                        .map_or(false, |targets| targets.contains(index));
                    if !present {
                        return Err(StorageError::new(
                            crate::ErrorKind::NotFound,
                            format!("AliasesMissingException[aliases [{}] missing]", alias),
                        )
                        .with_error_type("aliases_not_found_exception"));
                    }
                }
            }
        }

        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    state
                        .aliases
                        .entry(alias.clone())
                        .or_default()
                        .insert(index.clone());
                }
                AliasAction::Remove { index, alias } => {
                    if let Some(targets) = state.aliases.get_mut(alias) {
                        targets.remove(index);
                    }
                }
            }
        }
        state.aliases.retain(|_, targets| !targets.is_empty());
        Ok(())
    }

    async fn recovery(&self, index: &str) -> Result<Vec<ShardRecovery>> {
        let state = self.state.read();
        let name = state.resolve_single(index)?;
        let index = state.index(&name)?;
        Ok((0..index.shards)
            .map(|shard| ShardRecovery {
                shard,
                stage: index.recovery_stage,
            })
            .collect())
    }

    async fn bulk(&self, index: &str, body: &str) -> Result<BulkResponse> {
        let started = Instant::now();
        let commands = ndjson::parse_bulk_body(body)?;

        let mut state = self.state.write();
        let default_target = state.resolve_single(index)?;
        let mut items = Vec::with_capacity(commands.len());

        for command in commands {
            let target = match &command.index {
                Some(name) => state.resolve_single(name)?,
                None => default_target.clone(),
            };
            let item = state.index_mut(&target)?.apply(&target, command);
            items.push(item);
        }
        drop(state);

        let errors = items.iter().any(BulkItem::is_error);
        debug!(index, items = items.len(), errors, "bulk applied");
        Ok(BulkResponse {
            took_ms: started.elapsed().as_millis() as u64,
            errors,
            items,
        })
    }

    async fn delete_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        version: Option<u64>,
    ) -> Result<DeleteResponse> {
        let mut state = self.state.write();
        let name = state.resolve_single(index)?;
        let target = state.index_mut(&name)?;
        target.ensure_writable(&name)?;

        let key = DocKey {
            doc_type: doc_type.to_string(),
            id: id.to_string(),
        };
        let current = target
            .live
            .get(&key)
            .map(|doc| doc.version)
            .ok_or_else(|| StorageError::document_not_found(format!("[{}][{}]", doc_type, id)))?;

        let version_type = if version.is_some() {
            VersionType::External
        } else {
            VersionType::Internal
        };
        let next = next_version(&key, version_type, version, Some(current))
            .map_err(|(_, error)| StorageError::version_conflict(error.reason))?;
        target.live.remove(&key);

        Ok(DeleteResponse {
            found: true,
            version: Some(next),
        })
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        let mut state = self.state.write();
        for name in state.resolve_many(&[index.to_string()])? {
            let target = state.index_mut(&name)?;
            target.visible = target.live.clone();
        }
        Ok(())
    }

    async fn get_document(
        &self,
        index: &str,
        doc_type: Option<&str>,
        id: &str,
    ) -> Result<Option<SearchHit>> {
        let state = self.state.read();
        let name = state.resolve_single(index)?;
        let target = state.index(&name)?;
        target.ensure_open(&name)?;

        Ok(target
            .live
            .iter()
            .find(|(key, _)| key.id == id && doc_type.map_or(true, |t| key.doc_type == t))
            .map(|(key, doc)| target.hit(&name, key, doc)))
    }

    async fn search(&self, indices: &[String], body: &Value) -> Result<SearchResponse> {
        let (hits, _) = self.state.read().collect_hits(indices, body)?;
        let from = body.get("from").and_then(Value::as_u64).unwrap_or(0) as usize;
        let size = body
            .get("size")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_SEARCH_SIZE, |s| s as usize);

        Ok(SearchResponse {
            total: hits.len(),
            hits: hits.into_iter().skip(from).take(size).collect(),
        })
    }

    async fn analyze(&self, index: &str, analyzer: &str, text: &str) -> Result<Vec<String>> {
        {
            let state = self.state.read();
            let name = state.resolve_single(index)?;
            state.index(&name)?.ensure_open(&name)?;
        }
        analysis::analyze(analyzer, text)
    }

    async fn open_scroll(
        &self,
        indices: &[String],
        body: &Value,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<ScrollPage> {
        if page_size == 0 {
            return Err(StorageError::invalid_request("scroll page size must be positive"));
        }
        self.purge_expired_scrolls();

        let (hits, shards) = self.state.read().collect_hits(indices, body)?;
        let mut context = ScrollContext {
            remaining: hits.into(),
            page_size: page_size.saturating_mul(shards as usize),
            expires_at: Instant::now() + keep_alive,
        };
        let first = context.next_page();

        let scroll_id = Uuid::new_v4().to_string();
        self.scrolls.insert(scroll_id.clone(), context);
        debug!(scroll_id = %scroll_id, hits = first.len(), "opened scroll");

        Ok(ScrollPage {
            scroll_id: Some(scroll_id),
            hits: first,
        })
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<ScrollPage> {
        let missing = || {
            StorageError::new(
                crate::ErrorKind::NotFound,
                format!(
                    "SearchContextMissingException[No search context found for id [{}]]",
                    scroll_id
                ),
            )
            .with_error_type("search_context_missing_exception")
        };

        let mut context = self.scrolls.get_mut(scroll_id).ok_or_else(missing)?;
        if context.expires_at <= Instant::now() {
            drop(context);
            self.scrolls.remove(scroll_id);
            return Err(missing());
        }
        context.expires_at = Instant::now() + keep_alive;
        let hits = context.next_page();

        Ok(ScrollPage {
            scroll_id: Some(scroll_id.to_string()),
            hits,
        })
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        self.scrolls.remove(scroll_id);
        Ok(())
    }
}

/// Flatten settings into dotted keys without `settings.` / `index.` prefixes
///
/// `{"settings":{"index":{"blocks":{"write":true}}}}`,
/// `{"index":{"blocks":{"write":true}}}` and `{"index.blocks.write":"true"}`
/// all normalize to `blocks.write`.
fn normalized_settings(value: &Value) -> BTreeMap<String, Value> {
    let mut flat = BTreeMap::new();
    flatten_into("", value, &mut flat);
    flat.into_iter()
        .filter(|(key, _)| !key.starts_with("mappings"))
        .map(|(key, value)| {
            let stripped = key.strip_prefix("settings.").unwrap_or(&key);
            let stripped = stripped.strip_prefix("index.").unwrap_or(stripped);
            (stripped.to_string(), value)
        })
        .collect()
}

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(&path, nested, out);
            }
        }
        other => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), other.clone());
            }
        }
    }
}

fn as_u64_lenient(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn as_bool_lenient(value: &Value) -> Option<bool> {
    value
        .as_bool()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalized_settings_accepts_every_shape() {
        for settings in [
            json!({"settings": {"index": {"blocks": {"write": true}}}}),
            json!({"index": {"blocks": {"write": true}}}),
            json!({"index.blocks.write": "true"}),
        ] {
            let flat = normalized_settings(&settings);
            assert_eq!(flat.get("blocks.write").and_then(as_bool_lenient), Some(true));
        }
    }

    #[test]
    fn test_mappings_are_not_settings() {
        let flat = normalized_settings(&json!({
            "settings": {"index": {"number_of_shards": 2}},
            "mappings": {"edition": {"properties": {"link": {"type": "string"}}}}
        }));
        assert_eq!(flat.len(), 1);
        assert_eq!(flat.get("number_of_shards"), Some(&json!(2)));
    }

    #[test]
    fn test_external_version_must_increase() {
        let key = DocKey {
            doc_type: "edition".to_string(),
            id: "/a".to_string(),
        };
        assert_eq!(next_version(&key, VersionType::External, Some(3), None), Ok(3));
        assert_eq!(next_version(&key, VersionType::External, Some(4), Some(3)), Ok(4));

        let (status, error) =
            next_version(&key, VersionType::External, Some(3), Some(3)).unwrap_err();
        assert_eq!(status, 409);
        assert!(error.reason.contains("current [3], provided [3]"));
        assert!(next_version(&key, VersionType::External, None, None).is_err());
    }

    #[test]
    fn test_internal_version_increments() {
        let key = DocKey {
            doc_type: "edition".to_string(),
            id: "/a".to_string(),
        };
        assert_eq!(next_version(&key, VersionType::Internal, None, None), Ok(1));
        assert_eq!(next_version(&key, VersionType::Internal, None, Some(7)), Ok(8));
        assert!(next_version(&key, VersionType::Internal, Some(6), Some(7)).is_err());
    }
}
