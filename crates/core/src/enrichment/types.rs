//! Core enrichment data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Media
// ============================================================================

/// Kind of media an enrichment was created from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Video,
    Audio,
    /// Plain transcript text, nothing to upload or transcribe.
    Transcript,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Transcript => "transcript",
        }
    }

    /// Returns true if the media must go through upload and transcription.
    pub fn needs_transcription(&self) -> bool {
        !matches!(self, MediaType::Transcript)
    }
}

impl FromStr for MediaType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(MediaType::Video),
            "audio" => Ok(MediaType::Audio),
            "transcript" => Ok(MediaType::Transcript),
            other => Err(ParseEnumError::new("media type", other)),
        }
    }
}

/// Error returned when a stored enum value is not recognised.
#[derive(Debug, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ============================================================================
// Stages
// ============================================================================

/// One phase of the processing pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    Transcription,
    AiEnrichment,
    Translation,
    AiEvaluation,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Upload,
        Stage::Transcription,
        Stage::AiEnrichment,
        Stage::Translation,
        Stage::AiEvaluation,
    ];

    /// The status an enrichment holds while this stage is in progress.
    pub fn status(&self) -> EnrichmentStatus {
        match self {
            Stage::Upload => EnrichmentStatus::UploadingMedia,
            Stage::Transcription => EnrichmentStatus::WaitingMediaTranscription,
            Stage::AiEnrichment => EnrichmentStatus::WaitingAiEnrichment,
            Stage::Translation => EnrichmentStatus::WaitingTranslation,
            Stage::AiEvaluation => EnrichmentStatus::WaitingAiEvaluation,
        }
    }

    /// Label used in "Max <label> retries reached" causes.
    /// Upload has no retry budget.
    pub fn retry_label(&self) -> Option<&'static str> {
        match self {
            Stage::Upload => None,
            Stage::Transcription => Some("transcription"),
            Stage::AiEnrichment => Some("enrichment"),
            Stage::Translation => Some("translation"),
            Stage::AiEvaluation => Some("evaluation"),
        }
    }

    /// Label used in "<Label> took too long" causes.
    pub fn timeout_label(&self) -> &'static str {
        match self {
            Stage::Upload => "Uploading",
            Stage::Transcription => "Transcription",
            Stage::AiEnrichment => "Enrichment",
            Stage::Translation => "Translation",
            Stage::AiEvaluation => "Evaluation",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Transcription => "transcription",
            Stage::AiEnrichment => "ai_enrichment",
            Stage::Translation => "translation",
            Stage::AiEvaluation => "ai_evaluation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("stage", s))
    }
}

// ============================================================================
// Status
// ============================================================================

/// Current status of an enrichment.
///
/// ```text
/// Pending -> UploadingMedia -> WaitingMediaTranscription -> WaitingAiEnrichment
///         -> WaitingTranslation -> WaitingAiEvaluation -> Success
///
/// Optional stages may be skipped going forward.
/// Any non-terminal status can move to Failure.
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Pending,
    UploadingMedia,
    WaitingMediaTranscription,
    WaitingAiEnrichment,
    WaitingTranslation,
    WaitingAiEvaluation,
    Success,
    Failure,
}

impl EnrichmentStatus {
    pub const ALL: [EnrichmentStatus; 8] = [
        EnrichmentStatus::Pending,
        EnrichmentStatus::UploadingMedia,
        EnrichmentStatus::WaitingMediaTranscription,
        EnrichmentStatus::WaitingAiEnrichment,
        EnrichmentStatus::WaitingTranslation,
        EnrichmentStatus::WaitingAiEvaluation,
        EnrichmentStatus::Success,
        EnrichmentStatus::Failure,
    ];

    /// Statuses that have a running stage (the ones the sweep inspects).
    pub const IN_PROGRESS: [EnrichmentStatus; 5] = [
        EnrichmentStatus::UploadingMedia,
        EnrichmentStatus::WaitingMediaTranscription,
        EnrichmentStatus::WaitingAiEnrichment,
        EnrichmentStatus::WaitingTranslation,
        EnrichmentStatus::WaitingAiEvaluation,
    ];

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnrichmentStatus::Success | EnrichmentStatus::Failure)
    }

    /// The pipeline stage running while in this status, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            EnrichmentStatus::UploadingMedia => Some(Stage::Upload),
            EnrichmentStatus::WaitingMediaTranscription => Some(Stage::Transcription),
            EnrichmentStatus::WaitingAiEnrichment => Some(Stage::AiEnrichment),
            EnrichmentStatus::WaitingTranslation => Some(Stage::Translation),
            EnrichmentStatus::WaitingAiEvaluation => Some(Stage::AiEvaluation),
            EnrichmentStatus::Pending | EnrichmentStatus::Success | EnrichmentStatus::Failure => {
                None
            }
        }
    }

    /// Statuses reachable from this one.
    pub fn allowed_transitions(&self) -> &'static [EnrichmentStatus] {
        use EnrichmentStatus::*;

        match self {
            Pending => &[
                UploadingMedia,
                WaitingMediaTranscription,
                WaitingAiEnrichment,
                Failure,
            ],
            UploadingMedia => &[WaitingMediaTranscription, WaitingAiEnrichment, Failure],
            WaitingMediaTranscription => &[WaitingAiEnrichment, Failure],
            WaitingAiEnrichment => &[WaitingTranslation, WaitingAiEvaluation, Success, Failure],
            WaitingTranslation => &[WaitingAiEvaluation, Success, Failure],
            WaitingAiEvaluation => &[Success, Failure],
            Success | Failure => &[],
        }
    }

    pub fn can_transition_to(&self, to: EnrichmentStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentStatus::Pending => "pending",
            EnrichmentStatus::UploadingMedia => "uploading_media",
            EnrichmentStatus::WaitingMediaTranscription => "waiting_media_transcription",
            EnrichmentStatus::WaitingAiEnrichment => "waiting_ai_enrichment",
            EnrichmentStatus::WaitingTranslation => "waiting_translation",
            EnrichmentStatus::WaitingAiEvaluation => "waiting_ai_evaluation",
            EnrichmentStatus::Success => "success",
            EnrichmentStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrichmentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnrichmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("enrichment status", s))
    }
}

// ============================================================================
// Enrichment
// ============================================================================

/// A unit of media undergoing automated processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Enrichment {
    /// Unique identifier (UUID).
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Client that created the enrichment (from auth identity).
    pub created_by: String,

    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Where terminal status notifications are delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_webhook_url: Option<String>,

    pub status: EnrichmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_cause: Option<String>,

    pub transcription_retries: u32,
    pub enrichment_retries: u32,
    pub translation_retries: u32,
    pub evaluation_retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcribing_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_enrichment_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_evaluation_started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_version_id: Option<String>,

    /// Optimistic concurrency token, bumped on every save.
    pub revision: i64,
}

impl Enrichment {
    /// Retry counter for a stage. Upload has none.
    pub fn retries(&self, stage: Stage) -> Option<u32> {
        match stage {
            Stage::Upload => None,
            Stage::Transcription => Some(self.transcription_retries),
            Stage::AiEnrichment => Some(self.enrichment_retries),
            Stage::Translation => Some(self.translation_retries),
            Stage::AiEvaluation => Some(self.evaluation_retries),
        }
    }

    /// When the given stage was last started.
    pub fn stage_started_at(&self, stage: Stage) -> Option<DateTime<Utc>> {
        match stage {
            Stage::Upload => self.upload_started_at,
            Stage::Transcription => self.transcribing_started_at,
            Stage::AiEnrichment => self.ai_enrichment_started_at,
            Stage::Translation => self.translation_started_at,
            Stage::AiEvaluation => self.ai_evaluation_started_at,
        }
    }

    pub fn set_stage_started_at(&mut self, stage: Stage, at: DateTime<Utc>) {
        let slot = match stage {
            Stage::Upload => &mut self.upload_started_at,
            Stage::Transcription => &mut self.transcribing_started_at,
            Stage::AiEnrichment => &mut self.ai_enrichment_started_at,
            Stage::Translation => &mut self.translation_started_at,
            Stage::AiEvaluation => &mut self.ai_evaluation_started_at,
        };
        *slot = Some(at);
    }

    /// Increment the retry counter of a stage and return the new value.
    pub fn increment_retries(&mut self, stage: Stage) -> Option<u32> {
        let counter = match stage {
            Stage::Upload => return None,
            Stage::Transcription => &mut self.transcription_retries,
            Stage::AiEnrichment => &mut self.enrichment_retries,
            Stage::Translation => &mut self.translation_retries,
            Stage::AiEvaluation => &mut self.evaluation_retries,
        };
        *counter = counter.saturating_add(1);
        Some(*counter)
    }

    /// Move to `to` if the transition table allows it.
    ///
    /// Entering a stage status stamps that stage's start time with `now`.
    /// Returns the previous status.
    pub fn transition_to(
        &mut self,
        to: EnrichmentStatus,
        now: DateTime<Utc>,
    ) -> Result<EnrichmentStatus, InvalidTransition> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(InvalidTransition { from, to });
        }

        if let Some(stage) = to.stage() {
            self.set_stage_started_at(stage, now);
        }
        self.status = to;
        self.updated_at = now;
        Ok(from)
    }

    /// Move to `Failure` with a cause. Returns the previous status.
    pub fn fail(
        &mut self,
        cause: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<EnrichmentStatus, InvalidTransition> {
        let from = self.transition_to(EnrichmentStatus::Failure, now)?;
        self.failure_cause = Some(cause.into());
        Ok(from)
    }

    /// Returns true if either version pointer is unset.
    pub fn missing_version_pointers(&self) -> bool {
        self.initial_version_id.is_none() || self.last_version_id.is_none()
    }
}

/// A transition rejected by the status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: EnrichmentStatus,
    pub to: EnrichmentStatus,
}

// ============================================================================
// Versions
// ============================================================================

/// One produced iteration of an enrichment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentVersion {
    pub id: String,
    pub enrichment_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EnrichmentMetadata>,
    #[serde(default)]
    pub multiple_choice_questions: Vec<MultipleChoiceQuestion>,
    /// False when a human edited this version.
    pub ai_generated: bool,
}

/// Descriptive metadata produced for a media item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discipline: Option<String>,
    /// ISO 639-1 code of the transcript language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultipleChoiceQuestion {
    pub question: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl MultipleChoiceQuestion {
    /// At least two choices and at least one marked correct.
    pub fn is_well_formed(&self) -> bool {
        !self.question.trim().is_empty()
            && self.choices.len() >= 2
            && self.choices.iter().any(|c| c.correct)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Choice {
    pub text: String,
    #[serde(default)]
    pub correct: bool,
}
