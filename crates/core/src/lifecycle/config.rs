//! Lifecycle and sweep configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::enrichment::Stage;

/// Per-stage retry limits and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_max_retries")]
    pub max_transcription_retries: u32,
    #[serde(default = "default_max_retries")]
    pub max_enrichment_retries: u32,
    #[serde(default = "default_max_retries")]
    pub max_translation_retries: u32,
    #[serde(default = "default_max_retries")]
    pub max_evaluation_retries: u32,

    /// Uploads of large media take longer than the other stages.
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_minutes: u64,
    #[serde(default = "default_stage_timeout")]
    pub transcription_timeout_minutes: u64,
    #[serde(default = "default_stage_timeout")]
    pub enrichment_timeout_minutes: u64,
    #[serde(default = "default_stage_timeout")]
    pub translation_timeout_minutes: u64,
    #[serde(default = "default_stage_timeout")]
    pub evaluation_timeout_minutes: u64,
}

fn default_max_retries() -> u32 {
    10
}

fn default_upload_timeout() -> u64 {
    120
}

fn default_stage_timeout() -> u64 {
    60
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_transcription_retries: default_max_retries(),
            max_enrichment_retries: default_max_retries(),
            max_translation_retries: default_max_retries(),
            max_evaluation_retries: default_max_retries(),
            upload_timeout_minutes: default_upload_timeout(),
            transcription_timeout_minutes: default_stage_timeout(),
            enrichment_timeout_minutes: default_stage_timeout(),
            translation_timeout_minutes: default_stage_timeout(),
            evaluation_timeout_minutes: default_stage_timeout(),
        }
    }
}

impl LifecycleConfig {
    /// Retry budget for a stage. `None` for upload.
    pub fn max_retries(&self, stage: Stage) -> Option<u32> {
        match stage {
            Stage::Upload => None,
            Stage::Transcription => Some(self.max_transcription_retries),
            Stage::AiEnrichment => Some(self.max_enrichment_retries),
            Stage::Translation => Some(self.max_translation_retries),
            Stage::AiEvaluation => Some(self.max_evaluation_retries),
        }
    }

    pub fn timeout_minutes(&self, stage: Stage) -> u64 {
        match stage {
            Stage::Upload => self.upload_timeout_minutes,
            Stage::Transcription => self.transcription_timeout_minutes,
            Stage::AiEnrichment => self.enrichment_timeout_minutes,
            Stage::Translation => self.translation_timeout_minutes,
            Stage::AiEvaluation => self.evaluation_timeout_minutes,
        }
    }

    /// Saturates at [`Duration::MAX`] for values chrono cannot represent.
    pub fn timeout(&self, stage: Stage) -> Duration {
        i64::try_from(self.timeout_minutes(stage))
            .ok()
            .and_then(Duration::try_minutes)
            .unwrap_or(Duration::MAX)
    }
}

/// Configuration for the periodic sweep task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// When disabled, sweeps only run through the maintenance API.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Rows loaded per page while scanning.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// Run the version pointer backfill once when the scheduler starts.
    #[serde(default = "default_backfill_on_start")]
    pub backfill_on_start: bool,
}

fn default_interval() -> u64 {
    300 // 5 minutes
}

fn default_batch_size() -> i64 {
    500
}

fn default_backfill_on_start() -> bool {
    true
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval(),
            batch_size: default_batch_size(),
            backfill_on_start: default_backfill_on_start(),
        }
    }
}
