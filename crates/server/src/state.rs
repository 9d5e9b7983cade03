use std::sync::Arc;

use enrichment_core::audit::{AuditHandle, AuditStore};
use enrichment_core::lifecycle::{LifecycleManager, SweepScheduler};
use enrichment_core::{Authenticator, Config, EnrichmentStore, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    audit: AuditHandle,
    audit_store: Arc<dyn AuditStore>,
    manager: Arc<LifecycleManager>,
    scheduler: Arc<SweepScheduler>,
}

impl AppState {
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        audit: AuditHandle,
        audit_store: Arc<dyn AuditStore>,
        manager: Arc<LifecycleManager>,
        scheduler: Arc<SweepScheduler>,
    ) -> Self {
        Self {
            config,
            authenticator,
            audit,
            audit_store,
            manager,
            scheduler,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn audit(&self) -> &AuditHandle {
        &self.audit
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    /// Lifecycle manager; every status change goes through it.
    pub fn manager(&self) -> &Arc<LifecycleManager> {
        &self.manager
    }

    /// Read access to enrichments for list endpoints.
    pub fn store(&self) -> &dyn EnrichmentStore {
        self.manager.store().as_ref()
    }

    pub fn scheduler(&self) -> &SweepScheduler {
        self.scheduler.as_ref()
    }
}
