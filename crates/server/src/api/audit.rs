use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use enrichment_core::audit::{AuditCategory, AuditFilter, AuditRecord};
use enrichment_core::enrichment::{EnrichmentStatus, ParseEnumError, Stage};

use super::enrichments::{bad_request, ApiResult, ErrorResponse};
use crate::state::AppState;

/// Maximum allowed limit for audit queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for audit queries
const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for the audit endpoints
#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub enrichment_id: Option<String>,
    /// Comma-separated, e.g. `stage_retry_recorded,enrichment_status_changed`
    pub event_type: Option<String>,
    /// `service`, `lifecycle`, `maintenance` or `webhook`
    pub category: Option<String>,
    /// Status moved to, or reported by a webhook
    pub status: Option<String>,
    /// Stage retried, or left by a status change
    pub stage: Option<String>,
    pub user_id: Option<String>,
    /// Events at or after this timestamp (ISO 8601)
    pub from: Option<DateTime<Utc>>,
    /// Events at or before this timestamp (ISO 8601)
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    /// Newest first
    pub events: Vec<AuditRecord>,
    /// Matching events ignoring limit/offset
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct StageSummaryResponse {
    /// Matching events per stage
    pub stages: BTreeMap<String, i64>,
}

fn internal_error(message: String) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!("{}", message);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
}

fn parse<T>(value: &str) -> ApiResult<T>
where
    T: std::str::FromStr<Err = ParseEnumError>,
{
    value.parse().map_err(|e: ParseEnumError| bad_request(e.to_string()))
}

/// Filter from query parameters, without limit and offset.
fn build_filter(params: &AuditQueryParams) -> ApiResult<AuditFilter> {
    let mut filter = AuditFilter::new();

    if let Some(ref enrichment_id) = params.enrichment_id {
        filter = filter.with_enrichment_id(enrichment_id);
    }
    if let Some(ref event_types) = params.event_type {
        for event_type in event_types.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            filter = filter.with_event_type(event_type);
        }
    }
    if let Some(ref category) = params.category {
        filter = filter.with_category(parse::<AuditCategory>(category)?);
    }
    if let Some(ref status) = params.status {
        filter = filter.with_status(parse::<EnrichmentStatus>(status)?);
    }
    if let Some(ref stage) = params.stage {
        filter = filter.with_stage(parse::<Stage>(stage)?);
    }
    if let Some(ref user_id) = params.user_id {
        filter = filter.with_user_id(user_id);
    }
    if params.from.is_some() || params.to.is_some() {
        filter = filter.with_time_range(params.from, params.to);
    }

    Ok(filter)
}

/// Query audit events
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> ApiResult<Json<AuditQueryResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);
    let base_filter = build_filter(&params)?;

    let events = state
        .audit_store()
        .query(&base_filter.clone().with_limit(limit).with_offset(offset))
        .map_err(|e| internal_error(format!("Failed to query audit events: {}", e)))?;

    let total = state
        .audit_store()
        .count(&base_filter)
        .map_err(|e| internal_error(format!("Failed to count audit events: {}", e)))?;

    Ok(Json(AuditQueryResponse {
        events,
        total,
        limit,
        offset,
    }))
}

/// Count matching audit events per pipeline stage.
///
/// `?status=failure` gives failures by stage, `?event_type=stage_retry_recorded`
/// gives retries by stage.
pub async fn stage_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> ApiResult<Json<StageSummaryResponse>> {
    let filter = build_filter(&params)?;

    let stages = state
        .audit_store()
        .count_by_stage(&filter)
        .map_err(|e| internal_error(format!("Failed to summarize audit events: {}", e)))?;

    Ok(Json(StageSummaryResponse { stages }))
}
