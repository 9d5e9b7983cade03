//! Transition events and the listener registration table.
//!
//! Every status change made through the [`LifecycleManager`](super::LifecycleManager)
//! is dispatched to the listeners registered here, after the new state has
//! been persisted. Listeners run synchronously on the caller's thread, so
//! anything slow (network, disk) must be queued to a background worker.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::audit::{AuditEvent, AuditHandle};
use crate::enrichment::{Enrichment, EnrichmentStatus};
use crate::metrics;

/// A persisted status change.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionEvent {
    pub enrichment_id: String,
    pub from: EnrichmentStatus,
    pub to: EnrichmentStatus,
    pub failure_cause: Option<String>,
    pub at: DateTime<Utc>,
}

impl TransitionEvent {
    pub fn new(from: EnrichmentStatus, enrichment: &Enrichment, at: DateTime<Utc>) -> Self {
        Self {
            enrichment_id: enrichment.id.clone(),
            from,
            to: enrichment.status,
            failure_cause: enrichment.failure_cause.clone(),
            at,
        }
    }
}

/// Which transitions a listener is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOn {
    Any,
    /// Only `success` and `failure`.
    Terminal,
    /// Only transitions into this status.
    Status(EnrichmentStatus),
}

impl ListenOn {
    pub fn matches(&self, to: EnrichmentStatus) -> bool {
        match self {
            ListenOn::Any => true,
            ListenOn::Terminal => to.is_terminal(),
            ListenOn::Status(status) => *status == to,
        }
    }
}

/// Reacts to persisted transitions.
pub trait TransitionListener: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Called with the event and the enrichment as saved.
    fn on_transition(&self, event: &TransitionEvent, enrichment: &Enrichment);
}

/// Closure-based listener, handy for tests and one-off hooks.
pub type TransitionCallback = Arc<dyn Fn(&TransitionEvent, &Enrichment) + Send + Sync>;

struct CallbackListener {
    name: String,
    callback: TransitionCallback,
}

impl TransitionListener for CallbackListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_transition(&self, event: &TransitionEvent, enrichment: &Enrichment) {
        (self.callback)(event, enrichment)
    }
}

/// Ordered table of registered listeners.
#[derive(Clone, Default)]
pub struct TransitionListeners {
    entries: Vec<(ListenOn, Arc<dyn TransitionListener>)>,
}

impl TransitionListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Listeners fire in registration order.
    pub fn register(&mut self, on: ListenOn, listener: Arc<dyn TransitionListener>) {
        tracing::debug!(listener = listener.name(), ?on, "Registered transition listener");
        self.entries.push((on, listener));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, on: ListenOn, listener: Arc<dyn TransitionListener>) -> Self {
        self.register(on, listener);
        self
    }

    /// Register a closure.
    pub fn with_callback(
        self,
        on: ListenOn,
        name: impl Into<String>,
        callback: TransitionCallback,
    ) -> Self {
        self.with(
            on,
            Arc::new(CallbackListener {
                name: name.into(),
                callback,
            }),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(_, l)| l.name()).collect()
    }

    /// Fire every listener whose filter matches the event.
    pub fn dispatch(&self, event: &TransitionEvent, enrichment: &Enrichment) {
        for (on, listener) in &self.entries {
            if on.matches(event.to) {
                listener.on_transition(event, enrichment);
            }
        }
    }
}

impl fmt::Debug for TransitionListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// ============================================================================
// Built-in listeners
// ============================================================================

/// Writes `enrichment_status_changed` audit events.
pub struct AuditListener {
    audit: AuditHandle,
}

impl AuditListener {
    pub fn new(audit: AuditHandle) -> Self {
        Self { audit }
    }
}

impl TransitionListener for AuditListener {
    fn name(&self) -> &str {
        "audit"
    }

    fn on_transition(&self, event: &TransitionEvent, _enrichment: &Enrichment) {
        self.audit.try_emit(AuditEvent::EnrichmentStatusChanged {
            enrichment_id: event.enrichment_id.clone(),
            from_status: event.from.to_string(),
            to_status: event.to.to_string(),
            failure_cause: event.failure_cause.clone(),
        });
    }
}

/// Counts transitions by target status.
pub struct MetricsListener;

impl TransitionListener for MetricsListener {
    fn name(&self) -> &str {
        "metrics"
    }

    fn on_transition(&self, event: &TransitionEvent, _enrichment: &Enrichment) {
        metrics::TRANSITIONS_TOTAL
            .with_label_values(&[event.to.as_str()])
            .inc();
    }
}

/// Logs every transition at info level, failures at warn.
pub struct LogListener;

impl TransitionListener for LogListener {
    fn name(&self) -> &str {
        "log"
    }

    fn on_transition(&self, event: &TransitionEvent, _enrichment: &Enrichment) {
        match event.failure_cause {
            Some(ref cause) if event.to == EnrichmentStatus::Failure => tracing::warn!(
                enrichment_id = %event.enrichment_id,
                from = %event.from,
                cause = %cause,
                "Enrichment failed"
            ),
            _ => tracing::info!(
                enrichment_id = %event.enrichment_id,
                from = %event.from,
                to = %event.to,
                "Enrichment status changed"
            ),
        }
    }
}
