//! Webhook delivery configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Used when an enrichment has no `notification_webhook_url` of its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_url: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Pending deliveries held before new ones are dropped.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_timeout() -> u64 {
    10
}

fn default_buffer_size() -> usize {
    256
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            default_url: None,
            timeout_secs: default_timeout(),
            buffer_size: default_buffer_size(),
        }
    }
}
