//! Queued webhook delivery.
//!
//! The lifecycle manager is synchronous, so terminal-state notifications are
//! pushed onto a bounded channel by [`WebhookListener`] and delivered by a
//! [`WebhookWorker`] running as a tokio task.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audit::{AuditEvent, AuditHandle};
use crate::enrichment::Enrichment;
use crate::lifecycle::{TransitionEvent, TransitionListener};
use crate::metrics;

use super::{Notifier, WebhookError, WebhookPayload};

/// One notification waiting to be sent.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub url: String,
    pub payload: WebhookPayload,
}

/// Queues deliveries for the worker. Cheap to clone.
#[derive(Clone)]
pub struct WebhookHandle {
    tx: mpsc::Sender<WebhookDelivery>,
}

impl WebhookHandle {
    pub fn new(tx: mpsc::Sender<WebhookDelivery>) -> Self {
        Self { tx }
    }

    /// Queue a delivery without waiting. Returns false if it was dropped.
    pub fn try_enqueue(&self, delivery: WebhookDelivery) -> bool {
        match self.tx.try_send(delivery) {
            Ok(()) => true,
            Err(e) => {
                metrics::WEBHOOK_DELIVERIES
                    .with_label_values(&["dropped"])
                    .inc();
                tracing::error!("Failed to queue webhook delivery: {}", e);
                false
            }
        }
    }
}

/// Background task draining the delivery queue.
pub struct WebhookWorker {
    rx: mpsc::Receiver<WebhookDelivery>,
    notifier: Arc<dyn Notifier>,
    audit: Option<AuditHandle>,
}

impl WebhookWorker {
    pub fn new(
        rx: mpsc::Receiver<WebhookDelivery>,
        notifier: Arc<dyn Notifier>,
        audit: Option<AuditHandle>,
    ) -> Self {
        Self {
            rx,
            notifier,
            audit,
        }
    }

    /// Deliver queued notifications until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!("Webhook worker started");

        while let Some(delivery) = self.rx.recv().await {
            let result = self.notifier.notify(&delivery.url, &delivery.payload).await;
            self.record(&delivery, result).await;
        }

        tracing::info!("Webhook worker shutting down");
    }

    async fn record(&self, delivery: &WebhookDelivery, result: Result<u16, WebhookError>) {
        let payload = &delivery.payload;
        let event = match result {
            Ok(status_code) => {
                metrics::WEBHOOK_DELIVERIES
                    .with_label_values(&["delivered"])
                    .inc();
                tracing::debug!(
                    enrichment_id = %payload.id,
                    url = %delivery.url,
                    status_code,
                    "Webhook delivered"
                );
                AuditEvent::WebhookDelivered {
                    enrichment_id: payload.id.clone(),
                    url: delivery.url.clone(),
                    status: payload.status.to_string(),
                    status_code,
                }
            }
            Err(e) => {
                metrics::WEBHOOK_DELIVERIES
                    .with_label_values(&["failed"])
                    .inc();
                tracing::warn!(
                    enrichment_id = %payload.id,
                    url = %delivery.url,
                    error = %e,
                    "Webhook delivery failed"
                );
                AuditEvent::WebhookFailed {
                    enrichment_id: payload.id.clone(),
                    url: delivery.url.clone(),
                    status: payload.status.to_string(),
                    error: e.to_string(),
                }
            }
        };

        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }
}

/// Create a connected handle/worker pair.
pub fn create_webhook_system(
    notifier: Arc<dyn Notifier>,
    buffer_size: usize,
    audit: Option<AuditHandle>,
) -> (WebhookHandle, WebhookWorker) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (WebhookHandle::new(tx), WebhookWorker::new(rx, notifier, audit))
}

/// Queues a notification for every terminal transition.
///
/// Register with [`ListenOn::Terminal`](crate::lifecycle::ListenOn::Terminal).
pub struct WebhookListener {
    handle: WebhookHandle,
    default_url: Option<String>,
}

impl WebhookListener {
    pub fn new(handle: WebhookHandle, default_url: Option<String>) -> Self {
        Self {
            handle,
            default_url,
        }
    }

    /// The enrichment's own URL wins over the configured default. Blank
    /// URLs count as unset.
    pub fn resolve_url(&self, enrichment: &Enrichment) -> Result<String, WebhookError> {
        let present = |url: &&str| !url.trim().is_empty();
        enrichment
            .notification_webhook_url
            .as_deref()
            .filter(present)
            .or(self.default_url.as_deref().filter(present))
            .map(String::from)
            .ok_or(WebhookError::NoUrl)
    }
}

impl TransitionListener for WebhookListener {
    fn name(&self) -> &str {
        "webhook"
    }

    fn on_transition(&self, event: &TransitionEvent, enrichment: &Enrichment) {
        if !event.to.is_terminal() {
            return;
        }

        match self.resolve_url(enrichment) {
            Ok(url) => {
                self.handle.try_enqueue(WebhookDelivery {
                    url,
                    payload: WebhookPayload::from(enrichment),
                });
            }
            Err(e) => {
                tracing::debug!(enrichment_id = %enrichment.id, "Skipping webhook: {}", e);
            }
        }
    }
}
