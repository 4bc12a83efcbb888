/*
 * indexsync indexer - safe mutation of a shared search index
 *
 * Three write paths share one live index:
 * - Full rebuilds into a new generation with an alias cutover
 * - Scrolled copies of an existing index (ReindexOrchestrator)
 * - A stream of change events, applied with external versioning
 *
 * Architecture:
 * - IndexHandle / IndexGroup (lock, alias, bulk, delete, commit)
 * - Enrichment pipeline (pluggable steps, run before every document write)
 * - ScrollCursor (lazy bulk reads)
 * - Rebuild job state machine
 * - Event ingest workers (retry with backoff, dead letters)
 * - IndexComparer (rebuild verification)
 */

// Public modules
pub mod bulk;
pub mod classification;
pub mod collaborators;
pub mod comparer;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod index;
pub mod ingest;
pub mod job;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod presenter;
pub mod retry;
pub mod scroll;
pub mod stages;
pub mod type_inference;

// Re-exports
pub use bulk::{BulkCommand, BulkPayload, BulkPayloadGenerator};
pub use classification::ClassificationCache;
pub use collaborators::{
    ClassificationService, ExpandedLinks, LinkedItem, PopularityLookup, RelationshipService,
};
pub use comparer::{compare_pairs, CompareCursor, ComparePair, ComparisonOutcome, IndexComparer};
pub use config::IndexerConfig;
pub use duplicates::{DuplicateDeleter, DuplicateReport, IdType};
pub use error::{ErrorCategory, IndexerError, Result};
pub use index::{
    strip_alias_from_index_name, BulkInput, BulkOptions, DeleteOutcome, IndexGroup, IndexHandle,
    LockGuard, WriteResult,
};
pub use ingest::{
    ChangeEvent, Delivery, Disposition, EventIngestWorker, EventQueue, InMemoryEventQueue,
    IngestOutcome, Settlement, SkipReason, WorkerPool,
};
pub use job::{JobState, JobStateMachine, RebuildJob, RebuildStage};
pub use metrics::{BulkMetrics, IngestMetrics};
pub use orchestrator::{
    match_all, BatchDispatcher, CopyBatch, CopyReport, InProcessDispatcher, ReindexOrchestrator,
};
pub use pipeline::{
    DocumentEnrichmentPipeline, EnrichmentContext, EnrichmentMetrics, EnrichmentStep,
};
pub use presenter::{DocumentIdentifier, EventPresenter};
pub use retry::RetryPolicy;
pub use scroll::ScrollCursor;
pub use stages::{BestBetStep, FormatStep, LinksStep, PopularityStep, SelfLinkStep};
pub use type_inference::DocumentTypeInferer;
