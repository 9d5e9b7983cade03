use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enrichment::{EnrichmentStatus, ParseEnumError};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Enrichment lifecycle
    EnrichmentCreated {
        enrichment_id: String,
        created_by: String,
        media_type: String,
    },
    EnrichmentStatusChanged {
        enrichment_id: String,
        from_status: String,
        to_status: String,
        /// Set when the new status is `failure`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure_cause: Option<String>,
    },
    StageRetryRecorded {
        enrichment_id: String,
        stage: String,
        /// Counter value after the increment
        retries: u32,
        max_retries: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    VersionAdded {
        enrichment_id: String,
        version_id: String,
        ai_generated: bool,
        /// True if this version became the initial version
        is_initial: bool,
    },

    // Maintenance
    SweepCompleted {
        scanned: u32,
        failed_max_retries: u32,
        failed_timeouts: u32,
        /// Rows skipped because they changed during the sweep
        conflicts: u32,
        duration_ms: u64,
    },
    BackfillCompleted {
        scanned: u32,
        updated: u32,
        conflicts: u32,
        duration_ms: u64,
    },

    // Notifications
    WebhookDelivered {
        enrichment_id: String,
        url: String,
        status: String,
        status_code: u16,
    },
    WebhookFailed {
        enrichment_id: String,
        url: String,
        status: String,
        error: String,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::EnrichmentCreated { .. } => "enrichment_created",
            Self::EnrichmentStatusChanged { .. } => "enrichment_status_changed",
            Self::StageRetryRecorded { .. } => "stage_retry_recorded",
            Self::VersionAdded { .. } => "version_added",
            Self::SweepCompleted { .. } => "sweep_completed",
            Self::BackfillCompleted { .. } => "backfill_completed",
            Self::WebhookDelivered { .. } => "webhook_delivered",
            Self::WebhookFailed { .. } => "webhook_failed",
        }
    }

    /// Extract enrichment_id if this event is enrichment-related
    pub fn enrichment_id(&self) -> Option<&str> {
        match self {
            Self::EnrichmentCreated { enrichment_id, .. }
            | Self::EnrichmentStatusChanged { enrichment_id, .. }
            | Self::StageRetryRecorded { enrichment_id, .. }
            | Self::VersionAdded { enrichment_id, .. }
            | Self::WebhookDelivered { enrichment_id, .. }
            | Self::WebhookFailed { enrichment_id, .. } => Some(enrichment_id),
            Self::ServiceStarted { .. }
            | Self::ServiceStopped { .. }
            | Self::SweepCompleted { .. }
            | Self::BackfillCompleted { .. } => None,
        }
    }

    /// Extract user_id if this event was triggered by a client action
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::EnrichmentCreated { created_by, .. } => Some(created_by),
            _ => None,
        }
    }

    pub fn category(&self) -> AuditCategory {
        match self {
            Self::ServiceStarted { .. } | Self::ServiceStopped { .. } => AuditCategory::Service,
            Self::EnrichmentCreated { .. }
            | Self::EnrichmentStatusChanged { .. }
            | Self::StageRetryRecorded { .. }
            | Self::VersionAdded { .. } => AuditCategory::Lifecycle,
            Self::SweepCompleted { .. } | Self::BackfillCompleted { .. } => {
                AuditCategory::Maintenance
            }
            Self::WebhookDelivered { .. } | Self::WebhookFailed { .. } => AuditCategory::Webhook,
        }
    }

    /// The status a change moved to, or the status a webhook reported.
    pub fn status(&self) -> Option<&str> {
        match self {
            Self::EnrichmentStatusChanged { to_status, .. } => Some(to_status),
            Self::WebhookDelivered { status, .. } | Self::WebhookFailed { status, .. } => {
                Some(status)
            }
            _ => None,
        }
    }

    /// The pipeline stage an event concerns.
    ///
    /// A status change is attributed to the stage it left, so a failure
    /// raised by the sweep or a worker lands on the stage that failed.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageRetryRecorded { stage, .. } => Some(stage),
            Self::EnrichmentStatusChanged { from_status, .. } => from_status
                .parse::<EnrichmentStatus>()
                .ok()
                .and_then(|status| status.stage())
                .map(|stage| stage.as_str()),
            _ => None,
        }
    }
}

/// Coarse grouping of event types for audit queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Service,
    Lifecycle,
    Maintenance,
    Webhook,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Lifecycle => "lifecycle",
            Self::Maintenance => "maintenance",
            Self::Webhook => "webhook",
        }
    }

    /// Event types stored under this category.
    pub fn event_types(&self) -> &'static [&'static str] {
        match self {
            Self::Service => &["service_started", "service_stopped"],
            Self::Lifecycle => &[
                "enrichment_created",
                "enrichment_status_changed",
                "stage_retry_recorded",
                "version_added",
            ],
            Self::Maintenance => &["sweep_completed", "backfill_completed"],
            Self::Webhook => &["webhook_delivered", "webhook_failed"],
        }
    }
}

impl FromStr for AuditCategory {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service" => Ok(Self::Service),
            "lifecycle" => Ok(Self::Lifecycle),
            "maintenance" => Ok(Self::Maintenance),
            "webhook" => Ok(Self::Webhook),
            other => Err(ParseEnumError::new("audit category", other)),
        }
    }
}

/// A stored audit record with metadata
///
/// `enrichment_id`, `user_id`, `status` and `stage` are copied out of the
/// event so they can be indexed and filtered on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub enrichment_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub data: AuditEvent,
}

impl AuditRecord {
    /// An unsaved record; the store assigns the id.
    pub fn new(event: AuditEvent, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            timestamp,
            event_type: event.event_type().to_string(),
            enrichment_id: event.enrichment_id().map(String::from),
            user_id: event.user_id().map(String::from),
            status: event.status().map(String::from),
            stage: event.stage().map(String::from),
            data: event,
        }
    }
}
