//! SQLite-backed enrichment store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};

use super::{
    CreateEnrichmentRequest, Enrichment, EnrichmentError, EnrichmentFilter, EnrichmentStatus,
    EnrichmentStore, EnrichmentVersion, MediaType, NewVersionRequest,
};

const ENRICHMENT_COLUMNS: &str = "id, created_at, updated_at, created_by, media_type, media_url, \
     notification_webhook_url, status, failure_cause, transcription_retries, enrichment_retries, \
     translation_retries, evaluation_retries, upload_started_at, transcribing_started_at, \
     ai_enrichment_started_at, translation_started_at, ai_evaluation_started_at, \
     initial_version_id, last_version_id, revision";

const VERSION_COLUMNS: &str =
    "id, enrichment_id, created_at, transcript, metadata, multiple_choice_questions, ai_generated";

/// SQLite-backed enrichment store.
pub struct SqliteEnrichmentStore {
    conn: Mutex<Connection>,
}

impl SqliteEnrichmentStore {
    /// Create a new SQLite store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, EnrichmentError> {
        let conn = Connection::open(path).map_err(db_error)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite store (useful for testing).
    pub fn in_memory() -> Result<Self, EnrichmentError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), EnrichmentError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS enrichments (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                created_by TEXT NOT NULL,
                media_type TEXT NOT NULL,
                media_url TEXT,
                notification_webhook_url TEXT,
                status TEXT NOT NULL,
                failure_cause TEXT,
                transcription_retries INTEGER NOT NULL DEFAULT 0,
                enrichment_retries INTEGER NOT NULL DEFAULT 0,
                translation_retries INTEGER NOT NULL DEFAULT 0,
                evaluation_retries INTEGER NOT NULL DEFAULT 0,
                upload_started_at TEXT,
                transcribing_started_at TEXT,
                ai_enrichment_started_at TEXT,
                translation_started_at TEXT,
                ai_evaluation_started_at TEXT,
                initial_version_id TEXT,
                last_version_id TEXT,
                revision INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_enrichments_status ON enrichments(status);
            CREATE INDEX IF NOT EXISTS idx_enrichments_created_by ON enrichments(created_by);
            CREATE INDEX IF NOT EXISTS idx_enrichments_created_at ON enrichments(created_at, id);

            CREATE TABLE IF NOT EXISTS enrichment_versions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                enrichment_id TEXT NOT NULL REFERENCES enrichments(id),
                created_at TEXT NOT NULL,
                transcript TEXT,
                metadata TEXT,
                multiple_choice_questions TEXT NOT NULL DEFAULT '[]',
                ai_generated INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_versions_enrichment
                ON enrichment_versions(enrichment_id, created_at, seq);
            "#,
        )
        .map_err(db_error)?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, EnrichmentError> {
        self.conn
            .lock()
            .map_err(|_| EnrichmentError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &EnrichmentFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            conditions.push(format!("status IN ({})", placeholders));
            for status in &filter.statuses {
                params.push(Box::new(status.as_str()));
            }
        }

        if let Some(ref created_by) = filter.created_by {
            conditions.push("created_by = ?".to_string());
            params.push(Box::new(created_by.clone()));
        }

        if filter.missing_version_pointers {
            conditions.push("(initial_version_id IS NULL OR last_version_id IS NULL)".to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_enrichment(row: &rusqlite::Row) -> rusqlite::Result<Enrichment> {
        let media_type: String = row.get(4)?;
        let status: String = row.get(7)?;

        Ok(Enrichment {
            id: row.get(0)?,
            created_at: parse_time(1, row.get(1)?)?,
            updated_at: parse_time(2, row.get(2)?)?,
            created_by: row.get(3)?,
            media_type: media_type
                .parse::<MediaType>()
                .map_err(|e| conversion_error(4, e))?,
            media_url: row.get(5)?,
            notification_webhook_url: row.get(6)?,
            status: status
                .parse::<EnrichmentStatus>()
                .map_err(|e| conversion_error(7, e))?,
            failure_cause: row.get(8)?,
            transcription_retries: row.get(9)?,
            enrichment_retries: row.get(10)?,
            translation_retries: row.get(11)?,
            evaluation_retries: row.get(12)?,
            upload_started_at: parse_optional_time(13, row.get(13)?)?,
            transcribing_started_at: parse_optional_time(14, row.get(14)?)?,
            ai_enrichment_started_at: parse_optional_time(15, row.get(15)?)?,
            translation_started_at: parse_optional_time(16, row.get(16)?)?,
            ai_evaluation_started_at: parse_optional_time(17, row.get(17)?)?,
            initial_version_id: row.get(18)?,
            last_version_id: row.get(19)?,
            revision: row.get(20)?,
        })
    }

    fn row_to_version(row: &rusqlite::Row) -> rusqlite::Result<EnrichmentVersion> {
        let metadata_json: Option<String> = row.get(4)?;
        let questions_json: String = row.get(5)?;

        let metadata = metadata_json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| conversion_error(4, e))?;
        let multiple_choice_questions =
            serde_json::from_str(&questions_json).map_err(|e| conversion_error(5, e))?;

        Ok(EnrichmentVersion {
            id: row.get(0)?,
            enrichment_id: row.get(1)?,
            created_at: parse_time(2, row.get(2)?)?,
            transcript: row.get(3)?,
            metadata,
            multiple_choice_questions,
            ai_generated: row.get(6)?,
        })
    }

    fn exists(conn: &Connection, id: &str) -> Result<bool, EnrichmentError> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM enrichments WHERE id = ?)",
            params![id],
            |row| row.get(0),
        )
        .map_err(db_error)
    }
}

impl EnrichmentStore for SqliteEnrichmentStore {
    fn create(&self, request: CreateEnrichmentRequest) -> Result<Enrichment, EnrichmentError> {
        let conn = self.lock()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let status = EnrichmentStatus::Pending;

        conn.execute(
            "INSERT INTO enrichments (id, created_at, updated_at, created_by, media_type, media_url, notification_webhook_url, status, revision) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)",
            params![
                id,
                format_time(&now),
                format_time(&now),
                request.created_by,
                request.media_type.as_str(),
                request.media_url,
                request.notification_webhook_url,
                status.as_str(),
            ],
        )
        .map_err(db_error)?;

        Ok(Enrichment {
            id,
            created_at: now,
            updated_at: now,
            created_by: request.created_by,
            media_type: request.media_type,
            media_url: request.media_url,
            notification_webhook_url: request.notification_webhook_url,
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
        })
    }

    fn get(&self, id: &str) -> Result<Option<Enrichment>, EnrichmentError> {
        let conn = self.lock()?;

        let result = conn.query_row(
            &format!("SELECT {} FROM enrichments WHERE id = ?", ENRICHMENT_COLUMNS),
            params![id],
            Self::row_to_enrichment,
        );

        match result {
            Ok(enrichment) => Ok(Some(enrichment)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_error(e)),
        }
    }

    fn list(&self, filter: &EnrichmentFilter) -> Result<Vec<Enrichment>, EnrichmentError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM enrichments {} ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
            ENRICHMENT_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql).map_err(db_error)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_enrichment)
            .map_err(db_error)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_error)
    }

    fn count(&self, filter: &EnrichmentFilter) -> Result<i64, EnrichmentError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM enrichments {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_error)
    }

    fn save(&self, enrichment: &Enrichment) -> Result<Enrichment, EnrichmentError> {
        let conn = self.lock()?;

        let changed = conn
            .execute(
                "UPDATE enrichments SET
                    updated_at = ?, media_url = ?, notification_webhook_url = ?,
                    status = ?, failure_cause = ?,
                    transcription_retries = ?, enrichment_retries = ?,
                    translation_retries = ?, evaluation_retries = ?,
                    upload_started_at = ?, transcribing_started_at = ?,
                    ai_enrichment_started_at = ?, translation_started_at = ?,
                    ai_evaluation_started_at = ?,
                    initial_version_id = ?, last_version_id = ?,
                    revision = revision + 1
                 WHERE id = ? AND revision = ?",
                params![
                    format_time(&enrichment.updated_at),
                    enrichment.media_url,
                    enrichment.notification_webhook_url,
                    enrichment.status.as_str(),
                    enrichment.failure_cause,
                    enrichment.transcription_retries,
                    enrichment.enrichment_retries,
                    enrichment.translation_retries,
                    enrichment.evaluation_retries,
                    enrichment.upload_started_at.as_ref().map(format_time),
                    enrichment.transcribing_started_at.as_ref().map(format_time),
                    enrichment.ai_enrichment_started_at.as_ref().map(format_time),
                    enrichment.translation_started_at.as_ref().map(format_time),
                    enrichment.ai_evaluation_started_at.as_ref().map(format_time),
                    enrichment.initial_version_id,
                    enrichment.last_version_id,
                    enrichment.id,
                    enrichment.revision,
                ],
            )
            .map_err(db_error)?;

        if changed == 0 {
            return Err(if Self::exists(&conn, &enrichment.id)? {
                EnrichmentError::Conflict {
                    id: enrichment.id.clone(),
                    expected_revision: enrichment.revision,
                }
            } else {
                EnrichmentError::NotFound(enrichment.id.clone())
            });
        }

        Ok(Enrichment {
            revision: enrichment.revision + 1,
            ..enrichment.clone()
        })
    }

    fn add_version(
        &self,
        request: NewVersionRequest,
    ) -> Result<EnrichmentVersion, EnrichmentError> {
        let conn = self.lock()?;

        if !Self::exists(&conn, &request.enrichment_id)? {
            return Err(EnrichmentError::NotFound(request.enrichment_id));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = request.created_at.unwrap_or_else(Utc::now);

        let metadata_json = request
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| EnrichmentError::Database(e.to_string()))?;
        let questions_json = serde_json::to_string(&request.multiple_choice_questions)
            .map_err(|e| EnrichmentError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO enrichment_versions (id, enrichment_id, created_at, transcript, metadata, multiple_choice_questions, ai_generated) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                request.enrichment_id,
                format_time(&created_at),
                request.transcript,
                metadata_json,
                questions_json,
                request.ai_generated,
            ],
        )
        .map_err(db_error)?;

        Ok(EnrichmentVersion {
            id,
            enrichment_id: request.enrichment_id,
            created_at,
            transcript: request.transcript,
            metadata: request.metadata,
            multiple_choice_questions: request.multiple_choice_questions,
            ai_generated: request.ai_generated,
        })
    }

    fn list_versions(
        &self,
        enrichment_id: &str,
    ) -> Result<Vec<EnrichmentVersion>, EnrichmentError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM enrichment_versions WHERE enrichment_id = ? ORDER BY created_at ASC, seq ASC",
                VERSION_COLUMNS
            ))
            .map_err(db_error)?;

        let rows = stmt
            .query_map(params![enrichment_id], Self::row_to_version)
            .map_err(db_error)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_error)
    }
}

fn db_error(e: rusqlite::Error) -> EnrichmentError {
    EnrichmentError::Database(e.to_string())
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

/// Fixed-width timestamps so that text ordering matches time ordering.
fn format_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_optional_time(
    idx: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_time(idx, v)).transpose()
}
