//! Integration tests for index handles, comparison and duplicate removal
//!
//! - Locked writes fail atomically
//! - Non-lock item failures surface every failed item
//! - Comparison of two live indices
//! - Duplicate deletion by content id and by link
//! - Scroll completeness for any page size

use indexsync_indexer::{
    BulkCommand, BulkInput, BulkOptions, DuplicateDeleter, ErrorCategory, IdType, IndexComparer,
    IndexHandle, IndexerConfig, IndexerError,
};
use indexsync_storage::{Document, InMemorySearchEngine, SearchEngine};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

async fn handle(engine: &InMemorySearchEngine, name: &str) -> IndexHandle {
    engine.create_index(name, &json!({})).await.unwrap();
    IndexHandle::new(
        Arc::new(engine.clone()),
        name,
        Arc::new(IndexerConfig::default()),
    )
}

fn doc(doc_type: &str, link: &str, content_id: Option<&str>, title: &str) -> Document {
    let mut doc =
        Document::from_value(json!({"_type": doc_type, "link": link, "title": title})).unwrap();
    if let Some(content_id) = content_id {
        doc.insert("content_id", content_id);
    }
    doc
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Locking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn test_locked_bulk_write_applies_nothing() {
    let engine = InMemorySearchEngine::new();
    let index = handle(&engine, "govuk_test").await;
    index.lock().await.unwrap();

    let err = index
        .add(vec![
            doc("edition", "/a", None, "A"),
            doc("edition", "/b", None, "B"),
        ])
        .await
        .unwrap_err();

    assert!(
        matches!(&err, IndexerError::IndexLocked { index } if index == "govuk_test"),
        "{:?}",
        err
    );
    assert!(err.is_retryable());
    assert_eq!(engine.document_count("govuk_test").unwrap(), 0);

    index.unlock().await.unwrap();
    index
        .add(vec![doc("edition", "/a", None, "A")])
        .await
        .unwrap();
    assert_eq!(engine.document_count("govuk_test").unwrap(), 1);
}

#[tokio::test]
async fn test_lock_guard_release_lifts_block() {
    let engine = InMemorySearchEngine::new();
    let index = handle(&engine, "govuk_test").await;

    let guard = index.lock_guard().await.unwrap();
    assert!(engine.is_write_blocked("govuk_test").unwrap());
    guard.release().await.unwrap();
    assert!(!engine.is_write_blocked("govuk_test").unwrap());
}

#[tokio::test]
async fn test_failed_items_surface_as_bulk_write_failure() {
    let engine = InMemorySearchEngine::new();
    let index = handle(&engine, "govuk_test").await;
    let mut fields = serde_json::Map::new();
    fields.insert("title".to_string(), json!("Renamed"));

    let err = index
        .bulk_write(
            BulkInput::Commands(vec![
                BulkCommand::index(&doc("edition", "/a", None, "A")).unwrap(),
                BulkCommand::update("edition", "/missing", fields),
            ]),
            BulkOptions::default(),
        )
        .await
        .unwrap_err();

    let IndexerError::BulkWriteFailure {
        index: failed_index,
        failed_items,
    } = &err
    else {
        panic!("expected BulkWriteFailure, got {:?}", err);
    };
    assert_eq!(failed_index, "govuk_test");
    assert_eq!(failed_items.len(), 1);
    assert_eq!(failed_items[0].id, "/missing");
    assert_eq!(failed_items[0].status, 404);
    assert_eq!(
        failed_items[0]
            .error
            .as_ref()
            .and_then(|e| e.error_type.as_deref()),
        Some("document_missing_exception")
    );
    assert_eq!(err.category(), ErrorCategory::Infrastructure);
    assert_eq!(engine.document_count("govuk_test").unwrap(), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Comparison
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn twin_indices(engine: &InMemorySearchEngine, count: usize) -> (IndexHandle, IndexHandle) {
    let left = handle(engine, "left_test").await;
    let right = handle(engine, "right_test").await;
    let docs: Vec<Document> = (0..count)
        .map(|i| doc("edition", &format!("/doc-{:02}", i), None, "Title"))
        .collect();
    left.add(docs.clone()).await.unwrap();
    right.add(docs).await.unwrap();
    (left, right)
}

#[tokio::test]
async fn test_identical_indices_compare_unchanged() {
    let engine = InMemorySearchEngine::new();
    let (left, right) = twin_indices(&engine, 12).await;
    left.commit().await.unwrap();
    right.commit().await.unwrap();

    let outcome = IndexComparer::new(left, right)
        .with_page_size(2)
        .run()
        .await
        .unwrap();

    let expected: BTreeMap<String, usize> = [("unchanged".to_string(), 12)].into_iter().collect();
    assert_eq!(outcome.to_map(), expected);
}

#[tokio::test]
async fn test_compare_counts_every_kind_of_difference() {
    let engine = InMemorySearchEngine::new();
    let (left, right) = twin_indices(&engine, 6).await;
    right.delete("edition", "/doc-02").await.unwrap();
    right
        .add(vec![
            doc("edition", "/doc-04", None, "Retitled"),
            doc("cma_case", "/doc-04", None, "Title"),
        ])
        .await
        .unwrap();
    let mut popular = doc("edition", "/doc-05", None, "Title");
    popular.insert("popularity", 0.5);
    right.add(vec![popular]).await.unwrap();
    left.commit().await.unwrap();
    right.commit().await.unwrap();

    let outcome = IndexComparer::new(left, right)
        .with_page_size(3)
        .run()
        .await
        .unwrap();

    let expected: BTreeMap<String, usize> = [
        ("added", 1),
        ("removed", 1),
        ("changed", 1),
        ("changes: title", 1),
        ("unchanged", 4),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    assert_eq!(outcome.to_map(), expected);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Duplicates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn seeded(docs: Vec<Document>) -> (InMemorySearchEngine, IndexHandle) {
    let engine = InMemorySearchEngine::new();
    let index = handle(&engine, "govuk_test").await;
    index.add(docs).await.unwrap();
    index.commit().await.unwrap();
    (engine, index)
}

async fn stored_types(index: &IndexHandle, link: &str) -> BTreeSet<String> {
    index
        .search(&json!({"query": {"term": {"link": link}}}))
        .await
        .unwrap()
        .into_iter()
        .map(|hit| hit.doc_type)
        .collect()
}

#[tokio::test]
async fn test_deletes_duplicate_by_link() {
    let (_engine, index) = seeded(vec![
        doc("edition", "/a", Some("c1"), "A"),
        doc("cma_case", "/a", Some("c1"), "A"),
    ])
    .await;

    let reports = DuplicateDeleter::new(index.clone(), "edition")
        .call(&["/a".to_string()], IdType::Link)
        .await
        .unwrap();

    assert!(reports[0].deleted);
    assert_eq!(
        reports[0].message,
        "Deleted duplicate for link /a of type edition"
    );
    index.commit().await.unwrap();
    assert_eq!(stored_types(&index, "/a").await, BTreeSet::from(["cma_case".to_string()]));
}

#[tokio::test]
async fn test_deletes_duplicate_by_content_id() {
    let (_engine, index) = seeded(vec![
        doc("edition", "/a", Some("c1"), "A"),
        doc("cma_case", "/a", Some("c1"), "A"),
    ])
    .await;

    let reports = DuplicateDeleter::new(index.clone(), "cma_case")
        .call(&["c1".to_string()], IdType::ContentId)
        .await
        .unwrap();

    assert!(reports[0].deleted);
    index.commit().await.unwrap();
    assert_eq!(stored_types(&index, "/a").await, BTreeSet::from(["edition".to_string()]));
}

#[tokio::test]
async fn test_single_match_is_not_a_duplicate() {
    let (_engine, index) = seeded(vec![doc("edition", "/a", Some("c1"), "A")]).await;

    let reports = DuplicateDeleter::new(index.clone(), "edition")
        .call(&["/a".to_string()], IdType::Link)
        .await
        .unwrap();

    assert!(!reports[0].deleted);
    assert_eq!(
        reports[0].message,
        "Skipping link /a as less than 2 results found"
    );
}

#[tokio::test]
async fn test_type_to_delete_must_be_present() {
    let (_engine, index) = seeded(vec![
        doc("edition", "/a", Some("c1"), "A"),
        doc("cma_case", "/a", Some("c1"), "A"),
    ])
    .await;

    let reports = DuplicateDeleter::new(index.clone(), "aaib_report")
        .call(&["/a".to_string()], IdType::Link)
        .await
        .unwrap();

    assert!(!reports[0].deleted);
    assert!(reports[0]
        .message
        .starts_with("Skipping link /a as type to delete aaib_report not present in"));
    assert_eq!(stored_types(&index, "/a").await.len(), 2);
}

#[tokio::test]
async fn test_conflicting_content_ids_are_kept() {
    let (_engine, index) = seeded(vec![
        doc("edition", "/a", Some("c1"), "A"),
        doc("cma_case", "/a", Some("c2"), "A"),
    ])
    .await;

    let reports = DuplicateDeleter::new(index.clone(), "edition")
        .call(&["/a".to_string()], IdType::Link)
        .await
        .unwrap();

    assert!(!reports[0].deleted);
    assert_eq!(
        reports[0].message,
        "Skipping link /a as multiple non-null content_id's detected"
    );
}

#[tokio::test]
async fn test_only_copy_with_content_id_is_kept() {
    let (_engine, index) = seeded(vec![
        doc("edition", "/a", Some("c1"), "A"),
        doc("cma_case", "/a", None, "A"),
    ])
    .await;

    let reports = DuplicateDeleter::new(index.clone(), "edition")
        .call(&["/a".to_string()], IdType::Link)
        .await
        .unwrap();

    assert!(!reports[0].deleted);
    assert_eq!(
        reports[0].message,
        "Skipping link /a as cma_case is indexed with a valid '_type' but a missing content ID"
    );
}

#[tokio::test]
async fn test_content_id_shared_by_different_links_is_kept() {
    let (_engine, index) = seeded(vec![
        doc("edition", "/a", Some("c1"), "A"),
        doc("cma_case", "/b", Some("c1"), "B"),
    ])
    .await;

    let reports = DuplicateDeleter::new(index.clone(), "edition")
        .call(&["c1".to_string()], IdType::ContentId)
        .await
        .unwrap();

    assert!(!reports[0].deleted);
    assert_eq!(
        reports[0].message,
        "Skipping content_id c1 as multiple _id's detected"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scrolling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

proptest! {
    #[test]
    fn prop_scroll_yields_each_document_once(count in 0usize..40, page_size in 1usize..12) {
        tokio_test::block_on(async {
            let (_engine, index) = seeded(
                (0..count)
                    .map(|i| doc("edition", &format!("/doc-{:02}", i), None, "T"))
                    .collect(),
            )
            .await;

            let links: Vec<String> = index
                .scroll(json!({"query": {"match_all": {}}}), page_size)
                .try_collect_all()
                .await
                .unwrap()
                .into_iter()
                .filter_map(|doc| doc.link().map(str::to_string))
                .collect();

            let distinct: BTreeSet<&String> = links.iter().collect();
            assert_eq!(links.len(), count);
            assert_eq!(distinct.len(), count);
        });
    }
}
