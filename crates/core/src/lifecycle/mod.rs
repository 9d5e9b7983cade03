//! Enrichment lifecycle: status transitions, retry accounting, the stuck
//! enrichment sweep and the version pointer backfill.

mod backfill;
mod config;
mod events;
mod manager;
mod scheduler;
mod sweep;

pub use backfill::{version_pointers, BackfillReport};
pub use config::{LifecycleConfig, SweepConfig};
pub use events::{
    AuditListener, ListenOn, LogListener, MetricsListener, TransitionCallback, TransitionEvent,
    TransitionListener, TransitionListeners,
};
pub use manager::{
    max_retries_cause, timeout_cause, LifecycleManager, DEFAULT_BATCH_SIZE, MAX_CONFLICT_RETRIES,
};
pub use scheduler::{SchedulerStatus, SweepScheduler};
pub use sweep::{evaluate, StuckReason, SweepReport};
