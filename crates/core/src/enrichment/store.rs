//! Enrichment storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{
    Enrichment, EnrichmentMetadata, EnrichmentStatus, EnrichmentVersion, InvalidTransition,
    MediaType, MultipleChoiceQuestion, Stage,
};

/// Error type for enrichment operations.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("Enrichment not found: {0}")]
    NotFound(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: EnrichmentStatus,
        to: EnrichmentStatus,
    },

    /// A stage operation was reported while the enrichment is elsewhere.
    #[error("Stage {stage} is not running (current status is {status})")]
    InvalidStage {
        stage: Stage,
        status: EnrichmentStatus,
    },

    /// The row was modified since it was read.
    #[error("Enrichment {id} was modified concurrently (expected revision {expected_revision})")]
    Conflict { id: String, expected_revision: i64 },

    /// Request content was rejected before touching the database.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<InvalidTransition> for EnrichmentError {
    fn from(e: InvalidTransition) -> Self {
        EnrichmentError::InvalidTransition {
            from: e.from,
            to: e.to,
        }
    }
}

/// Request to create a new enrichment.
#[derive(Debug, Clone)]
pub struct CreateEnrichmentRequest {
    /// Client creating the enrichment.
    pub created_by: String,
    pub media_type: MediaType,
    pub media_url: Option<String>,
    pub notification_webhook_url: Option<String>,
}

/// Request to append a version to an enrichment.
#[derive(Debug, Clone)]
pub struct NewVersionRequest {
    pub enrichment_id: String,
    pub transcript: Option<String>,
    pub metadata: Option<EnrichmentMetadata>,
    pub multiple_choice_questions: Vec<MultipleChoiceQuestion>,
    pub ai_generated: bool,
    /// Defaults to now. Set when importing historical versions.
    pub created_at: Option<DateTime<Utc>>,
}

impl NewVersionRequest {
    /// An empty AI-generated version for an enrichment.
    pub fn new(enrichment_id: impl Into<String>) -> Self {
        Self {
            enrichment_id: enrichment_id.into(),
            transcript: None,
            metadata: None,
            multiple_choice_questions: Vec::new(),
            ai_generated: true,
            created_at: None,
        }
    }
}

/// Filter for querying enrichments.
///
/// Results are ordered by `created_at` then `id`, oldest first.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentFilter {
    /// Match any of these statuses (empty = all).
    pub statuses: Vec<EnrichmentStatus>,
    /// Filter by creator.
    pub created_by: Option<String>,
    /// Only rows missing `initial_version_id` or `last_version_id`.
    pub missing_version_pointers: bool,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl EnrichmentFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            statuses: Vec::new(),
            created_by: None,
            missing_version_pointers: false,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: EnrichmentStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = EnrichmentStatus>) -> Self {
        self.statuses.extend(statuses);
        self
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    pub fn missing_version_pointers(mut self) -> Self {
        self.missing_version_pointers = true;
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
}

/// Trait for enrichment storage backends.
pub trait EnrichmentStore: Send + Sync {
    /// Create a new enrichment in `pending` status.
    fn create(&self, request: CreateEnrichmentRequest) -> Result<Enrichment, EnrichmentError>;

    /// Get an enrichment by ID.
    fn get(&self, id: &str) -> Result<Option<Enrichment>, EnrichmentError>;

    /// List enrichments matching the filter.
    fn list(&self, filter: &EnrichmentFilter) -> Result<Vec<Enrichment>, EnrichmentError>;

    /// Count enrichments matching the filter (ignores limit/offset).
    fn count(&self, filter: &EnrichmentFilter) -> Result<i64, EnrichmentError>;

    /// Persist all mutable fields of an enrichment.
    ///
    /// The write only applies if the stored revision still equals
    /// `enrichment.revision`; otherwise returns [`EnrichmentError::Conflict`].
    /// Returns the saved enrichment with its new revision.
    fn save(&self, enrichment: &Enrichment) -> Result<Enrichment, EnrichmentError>;

    /// Insert a version row. Does not touch the enrichment's pointers.
    fn add_version(&self, request: NewVersionRequest)
        -> Result<EnrichmentVersion, EnrichmentError>;

    /// Versions of an enrichment, oldest first (insertion order breaks ties).
    fn list_versions(&self, enrichment_id: &str)
        -> Result<Vec<EnrichmentVersion>, EnrichmentError>;
}
