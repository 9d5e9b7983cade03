//! Authentication and metrics middleware for API routes.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use enrichment_core::{AuthError, AuthRequest, Identity};

use crate::metrics::{
    normalize_path, AUTH_FAILURES_TOTAL, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION,
};
use crate::state::AppState;

/// Records request duration, count and in-flight gauge.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Validates credentials with the configured authenticator.
///
/// On success the [`Identity`] is stored in the request extensions for
/// [`AuthUser`]. Missing or wrong credentials yield 401.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let authenticator = state.authenticator();

    if authenticator.method_name() == "none" {
        request.extensions_mut().insert(Identity::anonymous());
        return Ok(next.run(request).await);
    }

    let headers: HashMap<String, String> = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    let source_ip = request
        .extensions()
        .get::<std::net::SocketAddr>()
        .map(|addr| addr.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));

    let auth_request = AuthRequest { headers, source_ip };

    match authenticator.authenticate(&auth_request).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        Err(AuthError::NotAuthenticated) => {
            AUTH_FAILURES_TOTAL
                .with_label_values(&["not_authenticated"])
                .inc();
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(AuthError::InvalidCredentials(_)) => {
            AUTH_FAILURES_TOTAL
                .with_label_values(&["invalid_credentials"])
                .inc();
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(e) => {
            tracing::error!("Authenticator error: {}", e);
            AUTH_FAILURES_TOTAL
                .with_label_values(&["internal_error"])
                .inc();
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Extractor for the authenticated user ID.
///
/// Falls back to "anonymous" when no identity is present.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let user_id = parts
            .extensions
            .get::<Identity>()
            .map(|id| id.user_id.clone())
            .unwrap_or_else(|| "anonymous".to_string());
        std::future::ready(Ok(AuthUser(user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request},
        middleware,
        routing::get,
        Router,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use enrichment_core::audit::{create_audit_system, AuditStore, SqliteAuditStore};
    use enrichment_core::config::{ApiClient, AuthConfig, DatabaseConfig, ServerConfig};
    use enrichment_core::lifecycle::{
        LifecycleConfig, LifecycleManager, SweepConfig, SweepScheduler, TransitionListeners,
    };
    use enrichment_core::webhook::WebhookConfig;
    use enrichment_core::{create_authenticator, AuthMethod, Config, SqliteEnrichmentStore};

    async fn user_handler(AuthUser(user_id): AuthUser) -> String {
        user_id
    }

    fn api_key_auth() -> AuthConfig {
        AuthConfig {
            method: AuthMethod::ApiKey,
            api_key: Some("secret-key".to_string()),
            clients: vec![ApiClient {
                name: "transcriber".to_string(),
                key: "transcriber-key".to_string(),
            }],
        }
    }

    fn create_test_state(auth: AuthConfig) -> Arc<AppState> {
        let config = Config {
            auth,
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            lifecycle: LifecycleConfig::default(),
            sweep: SweepConfig::default(),
            webhook: WebhookConfig::default(),
        };
        let authenticator: Arc<dyn enrichment_core::Authenticator> =
            Arc::from(create_authenticator(&config.auth).unwrap());

        let audit_store: Arc<dyn AuditStore> = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (audit_handle, _writer) = create_audit_system(audit_store.clone(), 16);
        let manager = Arc::new(LifecycleManager::new(
            Arc::new(SqliteEnrichmentStore::in_memory().unwrap()),
            config.lifecycle.clone(),
            TransitionListeners::new(),
        ));
        let scheduler = Arc::new(SweepScheduler::new(config.sweep.clone(), manager.clone()));

        Arc::new(AppState::new(
            config,
            authenticator,
            audit_handle,
            audit_store,
            manager,
            scheduler,
        ))
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/test", get(user_handler))
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    async fn body_string(response: Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_none_auth_is_anonymous() {
        let state = create_test_state(AuthConfig {
            method: AuthMethod::None,
            api_key: None,
            clients: Vec::new(),
        });

        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        let response = app(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "anonymous");
    }

    #[tokio::test]
    async fn test_shared_key_bearer() {
        let request = Request::builder()
            .uri("/test")
            .header(header::AUTHORIZATION, "Bearer secret-key")
            .body(Body::empty())
            .unwrap();
        let response = app(create_test_state(api_key_auth()))
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "api_key_user");
    }

    #[tokio::test]
    async fn test_client_key_identifies_client() {
        let request = Request::builder()
            .uri("/test")
            .header("X-API-Key", "transcriber-key")
            .body(Body::empty())
            .unwrap();
        let response = app(create_test_state(api_key_auth()))
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "transcriber");
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let request = Request::builder()
            .uri("/test")
            .header(header::AUTHORIZATION, "Bearer wrong-key")
            .body(Body::empty())
            .unwrap();
        let response = app(create_test_state(api_key_auth()))
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_key_rejected() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        let response = app(create_test_state(api_key_auth()))
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
