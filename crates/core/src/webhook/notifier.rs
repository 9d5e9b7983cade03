//! Webhook payload and HTTP delivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enrichment::{Enrichment, EnrichmentStatus};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Endpoint responded with status {0}")]
    Status(u16),

    #[error("No webhook URL configured")]
    NoUrl,
}

/// Body POSTed to the client when an enrichment reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub id: String,
    pub status: EnrichmentStatus,
    pub failure_cause: Option<String>,
    pub initial_version_id: Option<String>,
}

impl From<&Enrichment> for WebhookPayload {
    fn from(enrichment: &Enrichment) -> Self {
        Self {
            id: enrichment.id.clone(),
            status: enrichment.status,
            failure_cause: enrichment.failure_cause.clone(),
            initial_version_id: enrichment.initial_version_id.clone(),
        }
    }
}

/// Sends a payload to a URL.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the payload. Returns the response status code on success.
    async fn notify(&self, url: &str, payload: &WebhookPayload) -> Result<u16, WebhookError>;
}

/// Delivers webhooks with `reqwest`.
pub struct HttpNotifier {
    client: Client,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("enrichments/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WebhookError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, url: &str, payload: &WebhookPayload) -> Result<u16, WebhookError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WebhookError::Http(format!("request timed out: {}", e))
                } else {
                    WebhookError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Status(status.as_u16()));
        }
        Ok(status.as_u16())
    }
}
