//! Manual maintenance triggers and scheduler status.

use axum::{extract::State, Json};
use std::sync::Arc;

use enrichment_core::lifecycle::{BackfillReport, SchedulerStatus, SweepReport};

use super::enrichments::{error_response, ApiResult};
use crate::state::AppState;

/// Run a stuck-enrichment sweep immediately
pub async fn trigger_sweep(State(state): State<Arc<AppState>>) -> ApiResult<Json<SweepReport>> {
    let report = state.scheduler().sweep_now().await.map_err(error_response)?;
    Ok(Json(report))
}

/// Fill in missing initial/last version pointers
pub async fn trigger_backfill(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<BackfillReport>> {
    let report = state
        .scheduler()
        .backfill_now()
        .await
        .map_err(error_response)?;
    Ok(Json(report))
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    Json(state.scheduler().status().await)
}
