//! Common test utilities for API testing.
//!
//! The fixture builds the full router in-process on a temp database, with
//! webhook deliveries captured by a [`MockNotifier`].

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use enrichment_core::audit::{create_audit_system, AuditStore, SqliteAuditStore};
use enrichment_core::config::{ApiClient, AuthConfig, DatabaseConfig, ServerConfig};
use enrichment_core::lifecycle::{
    AuditListener, LifecycleConfig, LifecycleManager, ListenOn, LogListener, MetricsListener,
    SweepConfig, SweepScheduler, TransitionListeners,
};
use enrichment_core::testing::MockNotifier;
use enrichment_core::webhook::{create_webhook_system, WebhookConfig, WebhookListener};
use enrichment_core::{
    create_authenticator, AuthMethod, Authenticator, Config, EnrichmentStore,
    SqliteEnrichmentStore,
};

use enrichment_server::state::AppState;

/// Re-export fixtures for test convenience
pub use enrichment_core::testing::fixtures;

pub const DEFAULT_WEBHOOK_URL: &str = "https://lms.example.com/hooks/enrichment";

/// In-process server over a temp database.
pub struct TestFixture {
    pub router: Router,
    /// Direct store access, for seeding rows the API cannot produce
    /// (e.g. stages that started hours ago).
    pub store: Arc<dyn EnrichmentStore>,
    pub notifier: Arc<MockNotifier>,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Configuration for test fixture.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    /// Require this shared key; `None` disables auth.
    pub api_key: Option<String>,
    pub clients: Vec<ApiClient>,
    pub lifecycle: LifecycleConfig,
}

impl TestConfig {
    pub fn with_api_key(key: &str) -> Self {
        Self {
            api_key: Some(key.to_string()),
            ..Default::default()
        }
    }
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let auth = match test_config.api_key {
            Some(key) => AuthConfig {
                method: AuthMethod::ApiKey,
                api_key: Some(key),
                clients: test_config.clients,
            },
            None => AuthConfig {
                method: AuthMethod::None,
                api_key: None,
                clients: Vec::new(),
            },
        };

        let config = Config {
            auth,
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            lifecycle: test_config.lifecycle,
            sweep: SweepConfig::default(),
            webhook: WebhookConfig {
                default_url: Some(DEFAULT_WEBHOOK_URL.to_string()),
                ..Default::default()
            },
        };

        let authenticator: Arc<dyn Authenticator> = Arc::from(
            create_authenticator(&config.auth).expect("Failed to create authenticator"),
        );

        let audit_store: Arc<dyn AuditStore> =
            Arc::new(SqliteAuditStore::new(&db_path).expect("Failed to create audit store"));
        let store: Arc<dyn EnrichmentStore> = Arc::new(
            SqliteEnrichmentStore::new(&db_path).expect("Failed to create enrichment store"),
        );

        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let notifier = Arc::new(MockNotifier::new());
        let (webhook_handle, webhook_worker) =
            create_webhook_system(notifier.clone(), 16, Some(audit_handle.clone()));
        tokio::spawn(webhook_worker.run());

        let listeners = TransitionListeners::new()
            .with(ListenOn::Any, Arc::new(LogListener))
            .with(ListenOn::Any, Arc::new(MetricsListener))
            .with(ListenOn::Any, Arc::new(AuditListener::new(audit_handle.clone())))
            .with(
                ListenOn::Terminal,
                Arc::new(WebhookListener::new(
                    webhook_handle,
                    config.webhook.default_url.clone(),
                )),
            );

        let manager = Arc::new(
            LifecycleManager::new(Arc::clone(&store), config.lifecycle.clone(), listeners)
                .with_audit(audit_handle.clone())
                .with_batch_size(2),
        );
        let scheduler = Arc::new(SweepScheduler::new(
            config.sweep.clone(),
            Arc::clone(&manager),
        ));

        let state = Arc::new(AppState::new(
            config,
            authenticator,
            audit_handle,
            audit_store,
            manager,
            scheduler,
        ));

        let router = enrichment_server::api::create_router(state);

        Self {
            router,
            store,
            notifier,
            temp_dir,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), None).await
    }

    /// POST with an `Authorization: Bearer` header.
    pub async fn post_with_key(&self, path: &str, body: Value, key: &str) -> TestResponse {
        self.request("POST", path, Some(body), Some(key)).await
    }

    pub async fn get_with_key(&self, path: &str, key: &str) -> TestResponse {
        self.request("GET", path, None, Some(key)).await
    }

    /// Create an enrichment through the API and return its id.
    pub async fn create_enrichment(&self, media_type: &str) -> String {
        let response = self
            .post(
                "/api/v1/enrichments",
                serde_json::json!({
                    "media_type": media_type,
                    "media_url": "https://cdn.example.com/lecture.mp4",
                }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["id"]
            .as_str()
            .expect("Missing enrichment id")
            .to_string()
    }

    /// Walk an enrichment through the given statuses, asserting each succeeds.
    pub async fn advance(&self, id: &str, statuses: &[&str]) {
        for status in statuses {
            let response = self
                .post(
                    &format!("/api/v1/enrichments/{}/transition", id),
                    serde_json::json!({ "status": status }),
                )
                .await;
            assert_eq!(
                response.status,
                StatusCode::OK,
                "transition to {} failed: {}",
                status,
                response.body
            );
        }
    }

    /// Poll the audit endpoint until `expected` matching events are written.
    ///
    /// Audit events are written by a background task.
    pub async fn wait_for_audit(&self, query: &str, expected: u64) -> Value {
        let path = format!("/api/v1/audit?{}", query);
        for _ in 0..100 {
            let response = self.get(&path).await;
            if response.body["total"].as_u64() == Some(expected) {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Timed out waiting for {} audit events matching {}", expected, query);
    }

    /// Poll until the webhook worker has attempted `expected` deliveries.
    pub async fn wait_for_webhooks(&self, expected: usize) {
        for _ in 0..100 {
            if self.notifier.delivery_count().await >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Timed out waiting for {} webhook deliveries", expected);
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        key: Option<&str>,
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        if let Some(key) = key {
            request_builder = request_builder.header("Authorization", format!("Bearer {}", key));
        }

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
