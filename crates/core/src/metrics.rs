//! Prometheus metrics for core components.
//!
//! Covers the lifecycle manager (transitions, retries, conflicts), the
//! maintenance jobs (sweep, backfill) and webhook delivery.

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Lifecycle
// =============================================================================

/// Status transitions by target status.
pub static TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "enrichment_transitions_total",
            "Total enrichment status transitions",
        ),
        &["to_status"],
    )
    .unwrap()
});

/// Recoverable stage errors reported by workers.
pub static STAGE_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("enrichment_stage_retries_total", "Total stage retries recorded"),
        &["stage"],
    )
    .unwrap()
});

/// Saves rejected because the row changed underneath.
pub static REVISION_CONFLICTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "enrichment_revision_conflicts_total",
        "Total optimistic concurrency conflicts",
    )
    .unwrap()
});

// =============================================================================
// Maintenance
// =============================================================================

pub static SWEEP_RUNS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("enrichment_sweep_runs_total", "Total sweep runs").unwrap()
});

/// Enrichments failed by the sweep, by stage and category.
pub static SWEEP_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "enrichment_sweep_failures_total",
            "Enrichments moved to failure by the sweep",
        ),
        &["stage", "category"], // category: "max_retries", "timeout"
    )
    .unwrap()
});

pub static SWEEP_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("enrichment_sweep_duration_seconds", "Duration of a sweep run")
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
    )
    .unwrap()
});

pub static BACKFILL_UPDATES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "enrichment_backfill_updates_total",
        "Enrichments whose version pointers were backfilled",
    )
    .unwrap()
});

// =============================================================================
// Webhooks
// =============================================================================

/// Webhook deliveries by result.
pub static WEBHOOK_DELIVERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("enrichment_webhook_deliveries_total", "Total webhook deliveries"),
        &["result"], // "delivered", "failed", "dropped"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TRANSITIONS_TOTAL.clone()),
        Box::new(STAGE_RETRIES.clone()),
        Box::new(REVISION_CONFLICTS.clone()),
        Box::new(SWEEP_RUNS.clone()),
        Box::new(SWEEP_FAILURES.clone()),
        Box::new(SWEEP_DURATION.clone()),
        Box::new(BACKFILL_UPDATES.clone()),
        Box::new(WEBHOOK_DELIVERIES.clone()),
    ]
}
