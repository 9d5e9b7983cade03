//! Enrichment API handlers.
//!
//! Clients create enrichments and read them back; pipeline workers report
//! progress through the transition, retry, failure and version endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use enrichment_core::enrichment::{
    CreateEnrichmentRequest, Enrichment, EnrichmentError, EnrichmentFilter, EnrichmentMetadata,
    EnrichmentStatus, EnrichmentVersion, MediaType, MultipleChoiceQuestion, NewVersionRequest,
    ParseEnumError, Stage,
};

use super::middleware::AuthUser;
use crate::state::AppState;

/// Maximum allowed limit for enrichment queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for enrichment queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateEnrichmentBody {
    /// "video", "audio" or "transcript"
    pub media_type: String,
    pub media_url: Option<String>,
    pub notification_webhook_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListEnrichmentsParams {
    pub status: Option<String>,
    pub created_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct RetryBody {
    pub stage: String,
    /// Worker error message, kept in the audit log.
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FailureBody {
    pub cause: String,
}

#[derive(Debug, Deserialize)]
pub struct AddVersionBody {
    pub transcript: Option<String>,
    pub metadata: Option<EnrichmentMetadata>,
    #[serde(default)]
    pub multiple_choice_questions: Vec<MultipleChoiceQuestion>,
    /// Defaults to true; human edits send false.
    pub ai_generated: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ListEnrichmentsResponse {
    pub enrichments: Vec<Enrichment>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// An enrichment with its version history, oldest first.
#[derive(Debug, Serialize)]
pub struct EnrichmentDetailResponse {
    #[serde(flatten)]
    pub enrichment: Enrichment,
    pub versions: Vec<EnrichmentVersion>,
}

#[derive(Debug, Serialize)]
pub struct AddVersionResponse {
    pub version: EnrichmentVersion,
    pub enrichment: Enrichment,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

pub(crate) fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Map lifecycle errors to HTTP statuses.
pub(crate) fn error_response(e: EnrichmentError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match e {
        EnrichmentError::NotFound(_) => StatusCode::NOT_FOUND,
        EnrichmentError::InvalidTransition { .. }
        | EnrichmentError::InvalidStage { .. }
        | EnrichmentError::Conflict { .. } => StatusCode::CONFLICT,
        EnrichmentError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EnrichmentError::Database(ref msg) => {
            tracing::error!("Enrichment store error: {}", msg);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new enrichment owned by the caller
pub async fn create_enrichment(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<CreateEnrichmentBody>,
) -> ApiResult<(StatusCode, Json<Enrichment>)> {
    let media_type: MediaType = body
        .media_type
        .parse()
        .map_err(|e: ParseEnumError| bad_request(e.to_string()))?;

    let enrichment = state
        .manager()
        .create(CreateEnrichmentRequest {
            created_by: user_id,
            media_type,
            media_url: body.media_url,
            notification_webhook_url: body
                .notification_webhook_url
                .filter(|url| !url.trim().is_empty()),
        })
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(enrichment)))
}

/// List enrichments with optional filters
pub async fn list_enrichments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListEnrichmentsParams>,
) -> ApiResult<Json<ListEnrichmentsResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = EnrichmentFilter::new();
    if let Some(ref status) = params.status {
        let status: EnrichmentStatus = status
            .parse()
            .map_err(|e: ParseEnumError| bad_request(e.to_string()))?;
        filter = filter.with_status(status);
    }
    if let Some(ref created_by) = params.created_by {
        filter = filter.with_created_by(created_by);
    }

    let total = state.store().count(&filter).map_err(error_response)?;
    let enrichments = state
        .store()
        .list(&filter.with_limit(limit).with_offset(offset))
        .map_err(error_response)?;

    Ok(Json(ListEnrichmentsResponse {
        enrichments,
        total,
        limit,
        offset,
    }))
}

/// Get an enrichment with its versions
pub async fn get_enrichment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<EnrichmentDetailResponse>> {
    let enrichment = state.manager().get(&id).map_err(error_response)?;
    let versions = state.store().list_versions(&id).map_err(error_response)?;

    Ok(Json(EnrichmentDetailResponse {
        enrichment,
        versions,
    }))
}

/// Move an enrichment to a new status
pub async fn transition_enrichment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> ApiResult<Json<Enrichment>> {
    let to: EnrichmentStatus = body
        .status
        .parse()
        .map_err(|e: ParseEnumError| bad_request(e.to_string()))?;

    let enrichment = state
        .manager()
        .transition(&id, to)
        .map_err(error_response)?;
    Ok(Json(enrichment))
}

/// Record a recoverable error for the running stage
pub async fn record_retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RetryBody>,
) -> ApiResult<Json<Enrichment>> {
    let stage: Stage = body
        .stage
        .parse()
        .map_err(|e: ParseEnumError| bad_request(e.to_string()))?;

    let enrichment = state
        .manager()
        .record_retry(&id, stage, body.error.as_deref())
        .map_err(error_response)?;
    Ok(Json(enrichment))
}

/// Fail an enrichment on an unrecoverable worker error
pub async fn record_failure(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<FailureBody>,
) -> ApiResult<Json<Enrichment>> {
    let cause = body.cause.trim();
    if cause.is_empty() {
        return Err(error_response(EnrichmentError::Validation(
            "failure cause must not be empty".to_string(),
        )));
    }

    let enrichment = state
        .manager()
        .record_failure(&id, cause)
        .map_err(error_response)?;
    Ok(Json(enrichment))
}

/// Append a version produced by a worker or a human edit
pub async fn add_version(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AddVersionBody>,
) -> ApiResult<(StatusCode, Json<AddVersionResponse>)> {
    let request = NewVersionRequest {
        transcript: body.transcript,
        metadata: body.metadata,
        multiple_choice_questions: body.multiple_choice_questions,
        ai_generated: body.ai_generated.unwrap_or(true),
        ..NewVersionRequest::new(id)
    };

    let (version, enrichment) = state
        .manager()
        .record_version(request)
        .map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(AddVersionResponse {
            version,
            enrichment,
        }),
    ))
}
