use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::enrichment::{EnrichmentStatus, Stage};

use super::{AuditCategory, AuditRecord};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Filter for querying the audit log.
///
/// Conditions combine with AND. `event_types` matches any of its entries
/// and `category` narrows further to that category's event types.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub enrichment_id: Option<String>,
    pub event_types: Vec<String>,
    pub category: Option<AuditCategory>,
    /// Status moved to, or reported by a webhook.
    pub status: Option<EnrichmentStatus>,
    /// Stage retried, or left by a status change.
    pub stage: Option<Stage>,
    pub user_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            offset: 0,
            ..Default::default()
        }
    }

    pub fn with_enrichment_id(mut self, enrichment_id: impl Into<String>) -> Self {
        self.enrichment_id = Some(enrichment_id.into());
        self
    }

    /// Add an accepted event type.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    pub fn with_category(mut self, category: AuditCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_status(mut self, status: EnrichmentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Failures raised while `stage` was running.
    pub fn stage_failures(stage: Stage) -> Self {
        Self::new()
            .with_event_type("enrichment_status_changed")
            .with_status(EnrichmentStatus::Failure)
            .with_stage(stage)
    }
}

/// Storage for audit records.
pub trait AuditStore: Send + Sync {
    /// Insert an audit record, returns the assigned ID
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError>;

    /// Query audit records, newest first
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Count matching audit records
    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;

    /// Count matching records per stage, ignoring limit and offset.
    /// Records without a stage are left out.
    fn count_by_stage(&self, filter: &AuditFilter) -> Result<BTreeMap<String, i64>, AuditError>;
}
