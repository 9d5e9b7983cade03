//! Terminal-state notifications to client webhooks.

mod config;
mod dispatcher;
mod notifier;

pub use config::WebhookConfig;
pub use dispatcher::{
    create_webhook_system, WebhookDelivery, WebhookHandle, WebhookListener, WebhookWorker,
};
pub use notifier::{HttpNotifier, Notifier, WebhookError, WebhookPayload};
