//! Mock webhook notifier for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::webhook::{Notifier, WebhookDelivery, WebhookError, WebhookPayload};

/// Records every delivery instead of sending it.
///
/// # Example
///
/// ```rust,ignore
/// use enrichment_core::testing::MockNotifier;
///
/// let notifier = Arc::new(MockNotifier::new());
/// let (handle, worker) = create_webhook_system(notifier.clone(), 16, None);
///
/// // ... drive an enrichment to success ...
///
/// let sent = notifier.recorded_deliveries().await;
/// assert_eq!(sent.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockNotifier {
    deliveries: Arc<RwLock<Vec<WebhookDelivery>>>,
    /// When set, every delivery is recorded and then fails with this status.
    failure_status: Arc<RwLock<Option<u16>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All deliveries attempted so far, including failed ones.
    pub async fn recorded_deliveries(&self) -> Vec<WebhookDelivery> {
        self.deliveries.read().await.clone()
    }

    pub async fn delivery_count(&self) -> usize {
        self.deliveries.read().await.len()
    }

    /// Make subsequent deliveries fail with the given HTTP status.
    pub async fn set_failure_status(&self, status: Option<u16>) {
        *self.failure_status.write().await = status;
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, url: &str, payload: &WebhookPayload) -> Result<u16, WebhookError> {
        self.deliveries.write().await.push(WebhookDelivery {
            url: url.to_string(),
            payload: payload.clone(),
        });

        match *self.failure_status.read().await {
            Some(status) => Err(WebhookError::Status(status)),
            None => Ok(200),
        }
    }
}
