//! Repair of missing version pointers.
//!
//! Older rows, and rows whose pointer update lost a race after the version
//! was inserted, can have versions without `initial_version_id` or
//! `last_version_id`. The backfill fills the missing pointer from the
//! version history: earliest version for the initial, latest for the last.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::AuditEvent;
use crate::enrichment::{Enrichment, EnrichmentError, EnrichmentFilter, EnrichmentVersion};
use crate::metrics;

use super::manager::LifecycleManager;

/// Outcome of one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackfillReport {
    /// Enrichments with at least one missing pointer.
    pub scanned: u32,
    pub updated: u32,
    /// Rows left alone because they have no versions yet.
    pub without_versions: u32,
    /// Rows skipped because they changed during the run.
    pub conflicts: u32,
    pub duration_ms: u64,
}

/// Earliest and latest version by creation time.
///
/// Ties go to insertion order: the first inserted of the earliest versions
/// and the last inserted of the latest. `versions` must be in insertion
/// order within equal timestamps, as `list_versions` returns them.
pub fn version_pointers(versions: &[EnrichmentVersion]) -> Option<(&str, &str)> {
    let initial = versions.iter().min_by_key(|v| v.created_at)?;
    let last = versions.iter().max_by_key(|v| v.created_at)?;
    Some((initial.id.as_str(), last.id.as_str()))
}

impl LifecycleManager {
    /// Fill missing version pointers across all enrichments.
    ///
    /// Pointers that are already set are left untouched. Safe to run
    /// repeatedly; a second run finds nothing to update. Paging follows
    /// [`sweep_at`](Self::sweep_at).
    pub fn backfill_version_pointers(&self) -> Result<BackfillReport, EnrichmentError> {
        let _guard = self.maintenance_guard()?;
        let started = Instant::now();
        let mut report = BackfillReport::default();

        let filter = EnrichmentFilter::new()
            .missing_version_pointers()
            .with_limit(self.batch_size);
        let mut offset = 0;

        loop {
            let page = self.store().list(&filter.clone().with_offset(offset))?;
            let page_len = page.len() as i64;
            let mut removed = 0;

            for mut enrichment in page {
                report.scanned += 1;

                let versions = self.store().list_versions(&enrichment.id)?;
                let Some((initial, last)) = version_pointers(&versions) else {
                    report.without_versions += 1;
                    continue;
                };

                if enrichment.initial_version_id.is_none() {
                    enrichment.initial_version_id = Some(initial.to_string());
                }
                if enrichment.last_version_id.is_none() {
                    enrichment.last_version_id = Some(last.to_string());
                }

                match self.store().save(&enrichment) {
                    Ok(_) => {
                        metrics::BACKFILL_UPDATES.inc();
                        report.updated += 1;
                        removed += 1;
                    }
                    Err(EnrichmentError::Conflict { id, .. }) => {
                        metrics::REVISION_CONFLICTS.inc();
                        debug!(enrichment_id = %id, "Skipping enrichment changed during backfill");
                        report.conflicts += 1;
                        if !self.still_matches(&id, Enrichment::missing_version_pointers)? {
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
        info!(
            scanned = report.scanned,
            updated = report.updated,
            without_versions = report.without_versions,
            conflicts = report.conflicts,
            "Version pointer backfill finished"
        );
        self.emit(AuditEvent::BackfillCompleted {
            scanned: report.scanned,
            updated: report.updated,
            conflicts: report.conflicts,
            duration_ms: report.duration_ms,
        });

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use crate::enrichment::{EnrichmentStore, MediaType, SqliteEnrichmentStore};
    use crate::lifecycle::{LifecycleConfig, TransitionListeners};
    use crate::testing::fixtures;

    fn version(id: &str, offset_secs: i64) -> EnrichmentVersion {
        EnrichmentVersion {
            id: id.to_string(),
            enrichment_id: "e-1".to_string(),
            created_at: chrono::DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(offset_secs),
            transcript: None,
            metadata: None,
            multiple_choice_questions: Vec::new(),
            ai_generated: true,
        }
    }

    #[test]
    fn test_version_pointers_ties_follow_insertion() {
        assert_eq!(version_pointers(&[]), None);

        let versions = vec![
            version("a", 10),
            version("b", 10),
            version("c", 20),
            version("d", 20),
        ];
        assert_eq!(version_pointers(&versions), Some(("a", "d")));
    }

    #[test]
    fn test_backfill_fills_only_missing_pointers() {
        let store = Arc::new(SqliteEnrichmentStore::in_memory().unwrap());
        let manager = LifecycleManager::new(
            store.clone(),
            LifecycleConfig::default(),
            TransitionListeners::new(),
        )
        .with_batch_size(2);
        let base = Utc::now() - Duration::hours(1);

        // Versions written straight to the store, pointers never set
        let mut expected = Vec::new();
        for _ in 0..3 {
            let e = store.create(fixtures::create_request(MediaType::Audio)).unwrap();
            let late = store
                .add_version(fixtures::version_at(&e.id, base + Duration::minutes(30)))
                .unwrap();
            let early = store
                .add_version(fixtures::version_at(&e.id, base))
                .unwrap();
            expected.push((e.id, early.id, late.id));
        }

        // Last pointer already set by hand; must survive
        let mut partial = store.create(fixtures::create_request(MediaType::Audio)).unwrap();
        let only = store.add_version(fixtures::version_at(&partial.id, base)).unwrap();
        partial.last_version_id = Some("manual".to_string());
        store.save(&partial).unwrap();

        let empty = store.create(fixtures::create_request(MediaType::Video)).unwrap();

        let report = manager.backfill_version_pointers().unwrap();
        assert_eq!(report.scanned, 5);
        assert_eq!(report.updated, 4);
        assert_eq!(report.without_versions, 1);

        for (id, early, late) in expected {
            let e = store.get(&id).unwrap().unwrap();
            assert_eq!(e.initial_version_id, Some(early));
            assert_eq!(e.last_version_id, Some(late));
        }

        let partial = store.get(&partial.id).unwrap().unwrap();
        assert_eq!(partial.initial_version_id, Some(only.id));
        assert_eq!(partial.last_version_id.as_deref(), Some("manual"));

        let empty = store.get(&empty.id).unwrap().unwrap();
        assert!(empty.missing_version_pointers());

        let again = manager.backfill_version_pointers().unwrap();
        assert_eq!(again.updated, 0);
        assert_eq!(again.scanned, 1);
    }
}
