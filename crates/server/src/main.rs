use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use enrichment_core::audit::{create_audit_system, AuditEvent, AuditStore, SqliteAuditStore};
use enrichment_core::lifecycle::{
    AuditListener, ListenOn, LifecycleManager, LogListener, MetricsListener, SweepScheduler,
    TransitionListeners,
};
use enrichment_core::webhook::{create_webhook_system, HttpNotifier, Notifier, WebhookListener};
use enrichment_core::{
    create_authenticator, load_config, validate_config, Authenticator, EnrichmentStore,
    SqliteEnrichmentStore,
};

use enrichment_server::api::create_router;
use enrichment_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("ENRICHMENT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Auth method: {:?}", config.auth.method);
    info!("Database path: {:?}", config.database.path);

    // Config hash for the ServiceStarted audit event
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!("Using authenticator: {}", authenticator.method_name());

    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    info!("Audit store initialized");

    let enrichment_store: Arc<dyn EnrichmentStore> = Arc::new(
        SqliteEnrichmentStore::new(&config.database.path)
            .context("Failed to create enrichment store")?,
    );
    info!("Enrichment store initialized");

    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    // Terminal-state webhooks
    let notifier: Arc<dyn Notifier> = Arc::new(
        HttpNotifier::new(Duration::from_secs(config.webhook.timeout_secs))
            .context("Failed to create webhook client")?,
    );
    let (webhook_handle, webhook_worker) = create_webhook_system(
        notifier,
        config.webhook.buffer_size,
        Some(audit_handle.clone()),
    );
    let webhook_worker_handle = tokio::spawn(webhook_worker.run());
    match config.webhook.default_url {
        Some(ref url) => info!("Default webhook URL: {}", url),
        None => info!("No default webhook URL, only per-enrichment URLs are notified"),
    }

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
    info!("Transition listeners: {:?}", listeners.names());

    let manager = Arc::new(
        LifecycleManager::new(enrichment_store, config.lifecycle.clone(), listeners)
            .with_audit(audit_handle.clone())
            .with_batch_size(config.sweep.batch_size),
    );

    let scheduler = Arc::new(SweepScheduler::new(
        config.sweep.clone(),
        Arc::clone(&manager),
    ));
    if config.sweep.enabled {
        scheduler.start();
        info!(
            "Sweep scheduler started (every {}s)",
            config.sweep.interval_secs
        );
    } else {
        info!("Sweep scheduler disabled in config");
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        authenticator,
        audit_handle.clone(),
        audit_store,
        manager,
        Arc::clone(&scheduler),
    ));

    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if scheduler.is_running() {
        info!("Stopping sweep scheduler...");
        scheduler.stop();
    }

    info!("Server shutting down...");
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The scheduler owns the last manager reference, and with it the
    // webhook handle and an audit handle. Both channels close only once
    // every sender is gone.
    drop(scheduler);
    let _ = webhook_worker_handle.await;
    info!("Webhook worker stopped");

    drop(audit_handle);
    let _ = writer_handle.await;
    info!("Audit writer stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
