//! Periodic detection of stuck enrichments.
//!
//! An in-progress enrichment is stuck when the running stage has used its
//! whole retry budget or has been running longer than its timeout. The
//! sweep moves such enrichments to `failure` with a cause naming the stage.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::AuditEvent;
use crate::enrichment::{
    Enrichment, EnrichmentError, EnrichmentFilter, EnrichmentStatus, Stage,
};
use crate::metrics;

use super::config::LifecycleConfig;
use super::manager::{max_retries_cause, timeout_cause, LifecycleManager};

/// Why the sweep failed an enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StuckReason {
    MaxRetries {
        stage: Stage,
        retries: u32,
        max: u32,
    },
    TimedOut {
        stage: Stage,
        started_at: DateTime<Utc>,
        timeout: Duration,
    },
}

impl StuckReason {
    pub fn stage(&self) -> Stage {
        match self {
            StuckReason::MaxRetries { stage, .. } | StuckReason::TimedOut { stage, .. } => *stage,
        }
    }

    /// Metric label.
    pub fn category(&self) -> &'static str {
        match self {
            StuckReason::MaxRetries { .. } => "max_retries",
            StuckReason::TimedOut { .. } => "timeout",
        }
    }

    /// The `failure_cause` written to the enrichment.
    pub fn cause(&self) -> String {
        match self {
            StuckReason::MaxRetries { stage, max, .. } => max_retries_cause(*stage, *max),
            StuckReason::TimedOut { stage, .. } => timeout_cause(*stage),
        }
    }
}

/// Decide whether an enrichment is stuck at `now`.
///
/// Only the stage matching the current status is examined. The retry check
/// wins over the timeout check. A stage without a start timestamp never
/// times out.
pub fn evaluate(
    enrichment: &Enrichment,
    now: DateTime<Utc>,
    config: &LifecycleConfig,
) -> Option<StuckReason> {
    let stage = enrichment.status.stage()?;

    if let (Some(retries), Some(max)) = (enrichment.retries(stage), config.max_retries(stage)) {
        if retries >= max {
            return Some(StuckReason::MaxRetries {
                stage,
                retries,
                max,
            });
        }
    }

    let started_at = enrichment.stage_started_at(stage)?;
    let timeout = config.timeout(stage);
    if now.signed_duration_since(started_at) > timeout {
        return Some(StuckReason::TimedOut {
            stage,
            started_at,
            timeout,
        });
    }

    None
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// In-progress enrichments examined.
    pub scanned: u32,
    /// Failures for exhausted retries, per stage.
    pub max_retries: BTreeMap<Stage, u32>,
    /// Failures for timeouts, per stage.
    pub timeouts: BTreeMap<Stage, u32>,
    /// Stuck rows skipped because they changed during the sweep.
    pub conflicts: u32,
    pub duration_ms: u64,
}

impl SweepReport {
    fn record(&mut self, reason: &StuckReason) {
        let bucket = match reason {
            StuckReason::MaxRetries { .. } => &mut self.max_retries,
            StuckReason::TimedOut { .. } => &mut self.timeouts,
        };
        *bucket.entry(reason.stage()).or_insert(0) += 1;
    }

    pub fn failed_max_retries(&self) -> u32 {
        self.max_retries.values().sum()
    }

    pub fn failed_timeouts(&self) -> u32 {
        self.timeouts.values().sum()
    }

    pub fn total_failed(&self) -> u32 {
        self.failed_max_retries() + self.failed_timeouts()
    }
}

impl LifecycleManager {
    /// Run one sweep at the current time.
    pub fn sweep(&self) -> Result<SweepReport, EnrichmentError> {
        self.sweep_at(Utc::now())
    }

    /// Run one sweep as if the clock read `now`.
    ///
    /// Pages through the in-progress statuses. Failed rows leave the filtered
    /// set, so the offset only advances past rows that stayed in it. A row
    /// that conflicts is re-read to learn whether the other writer moved it
    /// out of the set. Rows a concurrent writer moves into or out of the set
    /// between page reads can still shift a page; they are caught by the
    /// next sweep.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, EnrichmentError> {
        let _guard = self.maintenance_guard()?;
        let started = Instant::now();
        let mut report = SweepReport::default();

        let filter = EnrichmentFilter::new()
            .with_statuses(EnrichmentStatus::IN_PROGRESS)
            .with_limit(self.batch_size);
        let mut offset = 0;

        loop {
            let page = self.store().list(&filter.clone().with_offset(offset))?;
            let page_len = page.len() as i64;
            let mut removed = 0;

            for enrichment in page {
                report.scanned += 1;

                let Some(reason) = evaluate(&enrichment, now, self.config()) else {
                    continue;
                };

                match self.fail_stuck(enrichment, &reason, now) {
                    Ok(()) => {
                        report.record(&reason);
                        removed += 1;
                    }
                    Err(EnrichmentError::Conflict { id, .. }) => {
                        metrics::REVISION_CONFLICTS.inc();
                        debug!(enrichment_id = %id, "Skipping stuck enrichment changed during sweep");
                        report.conflicts += 1;
                        if !self.still_matches(&id, |e| {
                            EnrichmentStatus::IN_PROGRESS.contains(&e.status)
                        })? {
                            removed += 1;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }

            if page_len < self.batch_size {
                break;
            }
            offset += page_len - removed;
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        metrics::SWEEP_RUNS.inc();
        metrics::SWEEP_DURATION.observe(started.elapsed().as_secs_f64());

        if report.total_failed() > 0 || report.conflicts > 0 {
            info!(
                scanned = report.scanned,
                failed_max_retries = report.failed_max_retries(),
                failed_timeouts = report.failed_timeouts(),
                conflicts = report.conflicts,
                "Sweep failed stuck enrichments"
            );
        } else {
            debug!(scanned = report.scanned, "Sweep found nothing stuck");
        }

        self.emit(AuditEvent::SweepCompleted {
            scanned: report.scanned,
            failed_max_retries: report.failed_max_retries(),
            failed_timeouts: report.failed_timeouts(),
            conflicts: report.conflicts,
            duration_ms: report.duration_ms,
        });

        Ok(report)
    }

    /// Persist the failure for one stuck enrichment. No retry on conflict;
    /// the next sweep sees the fresh row.
    fn fail_stuck(
        &self,
        mut enrichment: Enrichment,
        reason: &StuckReason,
        now: DateTime<Utc>,
    ) -> Result<(), EnrichmentError> {
        let from = enrichment.fail(reason.cause(), now)?;
        let saved = self.store().save(&enrichment)?;

        metrics::SWEEP_FAILURES
            .with_label_values(&[reason.stage().as_str(), reason.category()])
            .inc();
        if let StuckReason::TimedOut { started_at, .. } = reason {
            warn!(
                enrichment_id = %saved.id,
                stage = %reason.stage(),
                started_at = %started_at,
                "Stage timed out"
            );
        }

        self.dispatch(from, &saved, now);
        Ok(())
    }
}
