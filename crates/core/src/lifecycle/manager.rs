//! The enrichment lifecycle manager.
//!
//! Owns every write to an enrichment's status. Worker callbacks come in
//! through [`transition`](LifecycleManager::transition),
//! [`record_retry`](LifecycleManager::record_retry),
//! [`record_failure`](LifecycleManager::record_failure) and
//! [`record_version`](LifecycleManager::record_version); the maintenance
//! jobs live in `sweep.rs` and `backfill.rs`.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::enrichment::{
    CreateEnrichmentRequest, Enrichment, EnrichmentError, EnrichmentStatus, EnrichmentStore,
    EnrichmentVersion, NewVersionRequest, Stage,
};
use crate::metrics;

use super::backfill::version_pointers;
use super::config::LifecycleConfig;
use super::events::{TransitionEvent, TransitionListeners};

/// Attempts made by worker operations when the row changes underneath.
pub const MAX_CONFLICT_RETRIES: u32 = 3;

/// Default page size for the sweep and backfill scans.
pub const DEFAULT_BATCH_SIZE: i64 = 500;

pub struct LifecycleManager {
    store: Arc<dyn EnrichmentStore>,
    config: LifecycleConfig,
    listeners: TransitionListeners,
    audit: Option<AuditHandle>,
    pub(super) batch_size: i64,
    /// Held while a sweep or backfill runs.
    maintenance: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn EnrichmentStore>,
        config: LifecycleConfig,
        listeners: TransitionListeners,
    ) -> Self {
        Self {
            store,
            config,
            listeners,
            audit: None,
            batch_size: DEFAULT_BATCH_SIZE,
            maintenance: Mutex::new(()),
        }
    }

    /// Emit audit events for creations, retries, versions and maintenance runs.
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EnrichmentStore> {
        &self.store
    }

    pub fn listeners(&self) -> &TransitionListeners {
        &self.listeners
    }

    pub fn create(&self, request: CreateEnrichmentRequest) -> Result<Enrichment, EnrichmentError> {
        let enrichment = self.store.create(request)?;

        info!(
            enrichment_id = %enrichment.id,
            media_type = enrichment.media_type.as_str(),
            created_by = %enrichment.created_by,
            "Enrichment created"
        );
        self.emit(AuditEvent::EnrichmentCreated {
            enrichment_id: enrichment.id.clone(),
            created_by: enrichment.created_by.clone(),
            media_type: enrichment.media_type.as_str().to_string(),
        });

        Ok(enrichment)
    }

    /// Load an enrichment, mapping absence to [`EnrichmentError::NotFound`].
    pub fn get(&self, id: &str) -> Result<Enrichment, EnrichmentError> {
        self.store
            .get(id)?
            .ok_or_else(|| EnrichmentError::NotFound(id.to_string()))
    }

    /// Move an enrichment to `to` if the transition table allows it.
    ///
    /// Entering a stage status stamps that stage's start time. Moving to
    /// `failure` this way leaves no cause; use
    /// [`record_failure`](Self::record_failure) for that.
    pub fn transition(&self, id: &str, to: EnrichmentStatus) -> Result<Enrichment, EnrichmentError> {
        self.mutate(id, |enrichment, now| {
            Ok(Some(enrichment.transition_to(to, now)?))
        })
    }

    /// Fail an enrichment on an unrecoverable worker error.
    pub fn record_failure(&self, id: &str, cause: &str) -> Result<Enrichment, EnrichmentError> {
        self.mutate(id, |enrichment, now| Ok(Some(enrichment.fail(cause, now)?)))
    }

    /// Record a recoverable error for the running stage.
    ///
    /// The enrichment must currently be in the stage's status. The retry
    /// counter is incremented and the stage clock restarted; reaching the
    /// configured maximum fails the enrichment instead.
    pub fn record_retry(
        &self,
        id: &str,
        stage: Stage,
        error: Option<&str>,
    ) -> Result<Enrichment, EnrichmentError> {
        let max = self.config.max_retries(stage).ok_or_else(|| {
            EnrichmentError::Validation(format!("stage {} has no retry budget", stage))
        })?;

        let saved = self.mutate(id, |enrichment, now| {
            if enrichment.status != stage.status() {
                return Err(EnrichmentError::InvalidStage {
                    stage,
                    status: enrichment.status,
                });
            }

            let retries = enrichment.increment_retries(stage).unwrap_or(0);
            if retries >= max {
                let from = enrichment.fail(max_retries_cause(stage, max), now)?;
                return Ok(Some(from));
            }

            enrichment.set_stage_started_at(stage, now);
            Ok(None)
        })?;

        let retries = saved.retries(stage).unwrap_or(0);
        metrics::STAGE_RETRIES
            .with_label_values(&[stage.as_str()])
            .inc();
        debug!(enrichment_id = %id, %stage, retries, max, "Stage retry recorded");
        self.emit(AuditEvent::StageRetryRecorded {
            enrichment_id: id.to_string(),
            stage: stage.to_string(),
            retries,
            max_retries: max,
            error: error.map(String::from),
        });

        Ok(saved)
    }

    /// Append a version and point the enrichment at it.
    ///
    /// Both pointers are recomputed from the version history, so a version
    /// appended with a past `created_at` becomes the initial version only if
    /// it is the earliest and never displaces a later last version. If the
    /// pointer update cannot be saved the version row is kept and the
    /// backfill repairs the pointers later.
    pub fn record_version(
        &self,
        request: NewVersionRequest,
    ) -> Result<(EnrichmentVersion, Enrichment), EnrichmentError> {
        if let Some(bad) = request
            .multiple_choice_questions
            .iter()
            .position(|q| !q.is_well_formed())
        {
            return Err(EnrichmentError::Validation(format!(
                "question {} needs text, at least two choices and one correct choice",
                bad + 1
            )));
        }

        let enrichment_id = request.enrichment_id.clone();
        // Fail fast before inserting an orphan version
        self.get(&enrichment_id)?;

        let version = self.store.add_version(request)?;
        let saved = self.mutate(&enrichment_id, |enrichment, _now| {
            let versions = self.store.list_versions(&enrichment.id)?;
            if let Some((initial, last)) = version_pointers(&versions) {
                enrichment.initial_version_id = Some(initial.to_string());
                enrichment.last_version_id = Some(last.to_string());
            }
            Ok(None)
        })?;
        let is_initial = saved.initial_version_id.as_deref() == Some(version.id.as_str());

        debug!(enrichment_id = %enrichment_id, version_id = %version.id, "Version recorded");
        self.emit(AuditEvent::VersionAdded {
            enrichment_id,
            version_id: version.id.clone(),
            ai_generated: version.ai_generated,
            is_initial,
        });

        Ok((version, saved))
    }

    /// Load, modify and save with bounded retries on revision conflicts.
    ///
    /// `apply` returns the previous status when it changed the status, so
    /// that listeners can be notified once the write is persisted.
    fn mutate<F>(&self, id: &str, mut apply: F) -> Result<Enrichment, EnrichmentError>
    where
        F: FnMut(&mut Enrichment, DateTime<Utc>) -> Result<Option<EnrichmentStatus>, EnrichmentError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut enrichment = self.get(id)?;
            let now = Utc::now();
            let previous = apply(&mut enrichment, now)?;
            enrichment.updated_at = now;

            match self.store.save(&enrichment) {
                Ok(saved) => {
                    if let Some(from) = previous {
                        self.dispatch(from, &saved, now);
                    }
                    return Ok(saved);
                }
                Err(e @ EnrichmentError::Conflict { .. }) => {
                    metrics::REVISION_CONFLICTS.inc();
                    if attempt >= MAX_CONFLICT_RETRIES {
                        warn!(enrichment_id = %id, attempt, "Giving up after repeated conflicts");
                        return Err(e);
                    }
                    debug!(enrichment_id = %id, attempt, "Revision conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(super) fn dispatch(&self, from: EnrichmentStatus, saved: &Enrichment, at: DateTime<Utc>) {
        let event = TransitionEvent::new(from, saved, at);
        self.listeners.dispatch(&event, saved);
    }

    pub(super) fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.try_emit(event);
        }
    }

    /// Whether the row still exists and satisfies `matches`. Used by the
    /// paged scans after a conflict.
    pub(super) fn still_matches(
        &self,
        id: &str,
        matches: impl Fn(&Enrichment) -> bool,
    ) -> Result<bool, EnrichmentError> {
        Ok(self.store.get(id)?.is_some_and(|e| matches(&e)))
    }

    /// Serialises sweep and backfill runs within this process.
    pub(super) fn maintenance_guard(&self) -> Result<MutexGuard<'_, ()>, EnrichmentError> {
        self.maintenance
            .lock()
            .map_err(|_| EnrichmentError::Database("maintenance lock poisoned".to_string()))
    }
}

/// Cause recorded when a stage exhausts its retry budget.
pub fn max_retries_cause(stage: Stage, max: u32) -> String {
    format!(
        "Max {} retries reached ({})",
        stage.retry_label().unwrap_or(stage.as_str()),
        max
    )
}

/// Cause recorded when a stage runs past its timeout.
pub fn timeout_cause(stage: Stage) -> String {
    format!("{} took too long", stage.timeout_label())
}
