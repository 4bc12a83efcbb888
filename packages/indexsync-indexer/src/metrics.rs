//! Prometheus metrics for ingest and bulk writes

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry, IntCounter,
    IntCounterVec, Opts, Registry,
};

use crate::error::Result;

/// Event ingest metrics
#[derive(Clone)]
pub struct IngestMetrics {
    /// Applied or skipped events, by outcome
    pub events: IntCounterVec,
    pub discards: IntCounter,
    pub retries: IntCounter,
    pub dead_letters: IntCounter,
}

impl IngestMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            events: register_int_counter_vec_with_registry!(
                Opts::new("indexsync_ingest_events_total", "Ingested events by outcome"),
                &["outcome"],
                registry
            )?,
            discards: register_int_counter_with_registry!(
                Opts::new(
                    "indexsync_ingest_discards_total",
                    "Events discarded as permanently invalid"
                ),
                registry
            )?,
            retries: register_int_counter_with_registry!(
                Opts::new("indexsync_ingest_retries_total", "Events requeued for retry"),
                registry
            )?,
            dead_letters: register_int_counter_with_registry!(
                Opts::new(
                    "indexsync_ingest_dead_letters_total",
                    "Events dead-lettered after exhausting retries"
                ),
                registry
            )?,
        })
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.events.with_label_values(&[outcome]).inc();
    }

    pub fn outcome_count(&self, outcome: &str) -> u64 {
        self.events.with_label_values(&[outcome]).get()
    }
}

/// Bulk write metrics
#[derive(Clone)]
pub struct BulkMetrics {
    pub items_written: IntCounter,
    pub items_failed: IntCounter,
    pub version_conflicts: IntCounter,
}

impl BulkMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            items_written: register_int_counter_with_registry!(
                Opts::new("indexsync_bulk_items_written_total", "Bulk items applied"),
                registry
            )?,
            items_failed: register_int_counter_with_registry!(
                Opts::new("indexsync_bulk_items_failed_total", "Bulk items rejected"),
                registry
            )?,
            version_conflicts: register_int_counter_with_registry!(
                Opts::new(
                    "indexsync_bulk_version_conflicts_total",
                    "Bulk items skipped as stale versions"
                ),
                registry
            )?,
        })
    }
}
