//! Document-by-document comparison of two indices
//!
//! Used to check a rebuilt generation against the one it replaces. Both
//! sides are scrolled sorted by `_id` (then `_type`) and merge-joined, so
//! memory stays bounded by the scroll page size.

use indexsync_storage::SearchHit;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::error::Result;
use crate::index::IndexHandle;
use crate::scroll::ScrollCursor;

/// Fields left out of the comparison unless configured otherwise
pub const DEFAULT_IGNORED_FIELDS: [&str; 1] = ["popularity"];

/// Join key of a compared document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CompareKey {
    pub id: String,
    pub doc_type: String,
}

/// One joined position; `None` marks the side without a document
#[derive(Debug, Clone, PartialEq)]
pub struct ComparePair {
    pub key: CompareKey,
    pub left: Option<Map<String, Value>>,
    pub right: Option<Map<String, Value>>,
}

/// A document's join key and source
pub type Keyed = (CompareKey, Map<String, Value>);

fn keyed(hit: SearchHit) -> Keyed {
    (
        CompareKey {
            id: hit.id,
            doc_type: hit.doc_type,
        },
        hit.source,
    )
}

/// Merge-join over two key-sorted cursors
pub struct CompareCursor {
    left: ScrollCursor<Keyed>,
    right: ScrollCursor<Keyed>,
    left_head: Option<Keyed>,
    right_head: Option<Keyed>,
    primed: bool,
}

impl CompareCursor {
    pub fn new(left: ScrollCursor<Keyed>, right: ScrollCursor<Keyed>) -> Self {
        Self {
            left,
            right,
            left_head: None,
            right_head: None,
            primed: false,
        }
    }

    /// Sorted cursors over two indices
    pub fn between(left: &IndexHandle, right: &IndexHandle, page_size: usize) -> Self {
        Self::new(
            left.scroll_with(sorted_match_all(), page_size, keyed),
            right.scroll_with(sorted_match_all(), page_size, keyed),
        )
    }

    pub async fn next(&mut self) -> Result<Option<ComparePair>> {
        if !self.primed {
            self.left_head = self.left.next().await?;
            self.right_head = self.right.next().await?;
            self.primed = true;
        }

        let ordering = match (&self.left_head, &self.right_head) {
            (None, None) => return Ok(None),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((left, _)), Some((right, _))) => left.cmp(right),
        };

        let pair = match ordering {
            Ordering::Less => self.take_left().await?.map(|(key, left)| ComparePair {
                key,
                left: Some(left),
                right: None,
            }),
            Ordering::Greater => self.take_right().await?.map(|(key, right)| ComparePair {
                key,
                left: None,
                right: Some(right),
            }),
            Ordering::Equal => {
                let left = self.take_left().await?;
                let right = self.take_right().await?;
                left.map(|(key, left)| ComparePair {
                    key,
                    left: Some(left),
                    right: right.map(|(_, right)| right),
                })
            }
        };
        Ok(pair)
    }

    async fn take_left(&mut self) -> Result<Option<Keyed>> {
        let head = self.left_head.take();
        self.left_head = self.left.next().await?;
        Ok(head)
    }

    async fn take_right(&mut self) -> Result<Option<Keyed>> {
        let head = self.right_head.take();
        self.right_head = self.right.next().await?;
        Ok(head)
    }
}

fn sorted_match_all() -> Value {
    json!({
        "query": {"match_all": {}},
        "sort": [{"_id": "asc"}, {"_type": "asc"}]
    })
}

/// Counts from one comparison; never persisted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComparisonOutcome {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub unchanged: usize,
    /// Changed documents per differing field
    pub field_changes: BTreeMap<String, usize>,
}

impl ComparisonOutcome {
    /// Count one joined pair
    pub fn record(
        &mut self,
        left: Option<&Map<String, Value>>,
        right: Option<&Map<String, Value>>,
        ignored: &BTreeSet<String>,
    ) {
        match (left, right) {
            (None, None) => {}
            (Some(_), None) => self.removed += 1,
            (None, Some(_)) => self.added += 1,
            (Some(left), Some(right)) => {
                let differing = differing_fields(left, right, ignored);
                if differing.is_empty() {
                    self.unchanged += 1;
                } else {
                    self.changed += 1;
                    for field in differing {
                        *self.field_changes.entry(field).or_default() += 1;
                    }
                }
            }
        }
    }

    /// Flat form, e.g. `{"changed": 1, "changes: title": 1}`; zero counts omitted
    pub fn to_map(&self) -> BTreeMap<String, usize> {
        let mut map = BTreeMap::new();
        for (name, count) in [
            ("added", self.added),
            ("removed", self.removed),
            ("changed", self.changed),
            ("unchanged", self.unchanged),
        ] {
            if count > 0 {
                map.insert(name.to_string(), count);
            }
        }
        for (field, count) in &self.field_changes {
            if *count > 0 {
                map.insert(format!("changes: {}", field), *count);
            }
        }
        map
    }
}

/// Keys whose values differ, over the union of both sides
fn differing_fields(
    left: &Map<String, Value>,
    right: &Map<String, Value>,
    ignored: &BTreeSet<String>,
) -> Vec<String> {
    let keys: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
    keys.into_iter()
        .filter(|key| !ignored.contains(*key))
        .filter(|key| left.get(*key) != right.get(*key))
        .cloned()
        .collect()
}

/// Compare already-joined pairs
pub fn compare_pairs<I>(pairs: I, ignored: &BTreeSet<String>) -> ComparisonOutcome
where
    I: IntoIterator<Item = ComparePair>,
{
    let mut outcome = ComparisonOutcome::default();
    for pair in pairs {
        outcome.record(pair.left.as_ref(), pair.right.as_ref(), ignored);
    }
    outcome
}

pub struct IndexComparer {
    left: IndexHandle,
    right: IndexHandle,
    ignored: BTreeSet<String>,
    page_size: usize,
}

impl IndexComparer {
    pub fn new(left: IndexHandle, right: IndexHandle) -> Self {
        let page_size = left.config().scroll.batch_size;
        Self {
            left,
            right,
            ignored: DEFAULT_IGNORED_FIELDS.iter().map(|f| f.to_string()).collect(),
            page_size,
        }
    }

    /// Replace the ignored field set
    pub fn with_ignored<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub async fn run(&self) -> Result<ComparisonOutcome> {
        info!(
            "Comparing {} with {}",
            self.left.index_name(),
            self.right.index_name()
        );
        let mut cursor = CompareCursor::between(&self.left, &self.right, self.page_size);
        let mut outcome = ComparisonOutcome::default();
        while let Some(pair) = cursor.next().await? {
            outcome.record(pair.left.as_ref(), pair.right.as_ref(), &self.ignored);
        }
        info!(
            "Compared {} with {}: {:?}",
            self.left.index_name(),
            self.right.index_name(),
            outcome.to_map()
        );
        Ok(outcome)
    }
}
