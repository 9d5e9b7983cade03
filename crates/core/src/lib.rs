pub mod audit;
pub mod auth;
pub mod config;
pub mod enrichment;
pub mod lifecycle;
pub mod metrics;
pub mod testing;
pub mod webhook;

pub use auth::{
    create_authenticator, AuthError, AuthRequest, Authenticator, Identity, NoneAuthenticator,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthMethod, Config, ConfigError,
    SanitizedConfig,
};
pub use enrichment::{
    Enrichment, EnrichmentError, EnrichmentStatus, EnrichmentStore, MediaType,
    SqliteEnrichmentStore, Stage,
};
pub use lifecycle::{LifecycleConfig, LifecycleManager, SweepConfig, SweepReport, SweepScheduler};
