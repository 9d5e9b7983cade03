//! Enrichments: media items moving through the processing pipeline.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteEnrichmentStore;
pub use store::{
    CreateEnrichmentRequest, EnrichmentError, EnrichmentFilter, EnrichmentStore,
    NewVersionRequest,
};
pub use types::{
    Choice, Enrichment, EnrichmentMetadata, EnrichmentStatus, EnrichmentVersion,
    InvalidTransition, MediaType, MultipleChoiceQuestion, ParseEnumError, Stage,
};
