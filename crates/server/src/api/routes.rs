use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::middleware::{auth_middleware, metrics_middleware};
use super::{audit, enrichments, handlers, maintenance};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Audit
        .route("/audit", get(audit::query_audit))
        .route("/audit/stages", get(audit::stage_summary))
        // Enrichments
        .route(
            "/enrichments",
            post(enrichments::create_enrichment).get(enrichments::list_enrichments),
        )
        .route("/enrichments/{id}", get(enrichments::get_enrichment))
        .route(
            "/enrichments/{id}/transition",
            post(enrichments::transition_enrichment),
        )
        .route("/enrichments/{id}/retry", post(enrichments::record_retry))
        .route("/enrichments/{id}/failure", post(enrichments::record_failure))
        .route("/enrichments/{id}/versions", post(enrichments::add_version))
        // Maintenance
        .route("/maintenance/sweep", post(maintenance::trigger_sweep))
        .route(
            "/maintenance/backfill-versions",
            post(maintenance::trigger_backfill),
        )
        .route("/maintenance/status", get(maintenance::get_status))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(metrics_middleware)),
        )
}
