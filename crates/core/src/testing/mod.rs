//! Testing utilities shared by unit and integration tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use enrichment_core::testing::{fixtures, MockNotifier};
//!
//! let store = SqliteEnrichmentStore::in_memory()?;
//! let stuck = fixtures::enrichment_in_stage(
//!     &store,
//!     Stage::Transcription,
//!     Utc::now() - Duration::minutes(180),
//! );
//! ```

mod mock_notifier;

pub use mock_notifier::MockNotifier;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{DateTime, Utc};

    use crate::enrichment::{
        CreateEnrichmentRequest, Enrichment, EnrichmentStatus, EnrichmentStore, MediaType,
        NewVersionRequest, Stage,
    };

    /// An unsaved enrichment with the given status and otherwise empty fields.
    pub fn enrichment(status: EnrichmentStatus) -> Enrichment {
        let now = Utc::now();
        Enrichment {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            created_by: "test-client".to_string(),
            media_type: MediaType::Video,
            media_url: Some("https://cdn.example.com/lecture.mp4".to_string()),
            notification_webhook_url: None,
            status,
            failure_cause: None,
            transcription_retries: 0,
            enrichment_retries: 0,
            translation_retries: 0,
            evaluation_retries: 0,
            upload_started_at: None,
            transcribing_started_at: None,
            ai_enrichment_started_at: None,
            translation_started_at: None,
            ai_evaluation_started_at: None,
            initial_version_id: None,
            last_version_id: None,
            revision: 0,
        }
    }

    pub fn create_request(media_type: MediaType) -> CreateEnrichmentRequest {
        CreateEnrichmentRequest {
            created_by: "test-client".to_string(),
            media_type,
            media_url: match media_type {
                MediaType::Transcript => None,
                _ => Some("https://cdn.example.com/lecture.mp4".to_string()),
            },
            notification_webhook_url: None,
        }
    }

    /// A version request stamped with an explicit creation time.
    pub fn version_at(enrichment_id: &str, created_at: DateTime<Utc>) -> NewVersionRequest {
        NewVersionRequest {
            transcript: Some(format!("transcript @ {}", created_at.to_rfc3339())),
            created_at: Some(created_at),
            ..NewVersionRequest::new(enrichment_id)
        }
    }

    /// Persist an enrichment sitting in `stage` since `started_at`.
    ///
    /// Writes the status directly, bypassing the transition table, so tests
    /// can set up rows that would take several worker callbacks to reach.
    pub fn enrichment_in_stage(
        store: &dyn EnrichmentStore,
        stage: Stage,
        started_at: DateTime<Utc>,
    ) -> Enrichment {
        let mut enrichment = store
            .create(create_request(MediaType::Video))
            .expect("create enrichment");
        enrichment.status = stage.status();
        enrichment.set_stage_started_at(stage, started_at);
        store.save(&enrichment).expect("save enrichment")
    }

    /// Same as [`enrichment_in_stage`] with the stage retry counter preset.
    pub fn enrichment_with_retries(
        store: &dyn EnrichmentStore,
        stage: Stage,
        started_at: DateTime<Utc>,
        retries: u32,
    ) -> Enrichment {
        let mut enrichment = enrichment_in_stage(store, stage, started_at);
        for _ in 0..retries {
            enrichment.increment_retries(stage);
        }
        store.save(&enrichment).expect("save enrichment")
    }
}
