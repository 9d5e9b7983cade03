use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, Row, ToSql};

use super::{AuditError, AuditEvent, AuditFilter, AuditRecord, AuditStore};

const COLUMNS: &str = "id, timestamp, event_type, enrichment_id, user_id, status, stage, data";

/// SQLite-backed audit log.
///
/// Status and stage are stored next to the JSON payload so that questions
/// like "which stage fails most" stay index lookups.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    /// Open (or create) the audit table in a database file.
    /// The file may be shared with the enrichment store.
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        let conn = Connection::open(path).map_err(db_error)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                enrichment_id TEXT,
                user_id TEXT,
                status TEXT,
                stage TEXT,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_events_enrichment ON audit_events(enrichment_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_events_type ON audit_events(event_type, timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_events_stage ON audit_events(stage, status);
            "#,
        )
        .map_err(db_error)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AuditError> {
        self.conn
            .lock()
            .map_err(|_| AuditError::Database("connection lock poisoned".to_string()))
    }
}

fn db_error(e: rusqlite::Error) -> AuditError {
    AuditError::Database(e.to_string())
}

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Conditions for `filter`, without limit and offset.
fn conditions(filter: &AuditFilter) -> (Vec<String>, Vec<Box<dyn ToSql>>) {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    let mut any_of = |column: &str, values: Vec<String>| {
        let placeholders = vec!["?"; values.len()].join(", ");
        conditions.push(format!("{} IN ({})", column, placeholders));
        for value in values {
            params.push(Box::new(value));
        }
    };

    if !filter.event_types.is_empty() {
        any_of("event_type", filter.event_types.clone());
    }
    if let Some(category) = filter.category {
        let types = category.event_types().iter().map(|t| t.to_string()).collect();
        any_of("event_type", types);
    }

    let mut equals = |column: &str, value: String| {
        conditions.push(format!("{} = ?", column));
        params.push(Box::new(value));
    };

    if let Some(ref enrichment_id) = filter.enrichment_id {
        equals("enrichment_id", enrichment_id.clone());
    }
    if let Some(status) = filter.status {
        equals("status", status.as_str().to_string());
    }
    if let Some(stage) = filter.stage {
        equals("stage", stage.as_str().to_string());
    }
    if let Some(ref user_id) = filter.user_id {
        equals("user_id", user_id.clone());
    }

    if let Some(ref from) = filter.from {
        conditions.push("timestamp >= ?".to_string());
        params.push(Box::new(format_timestamp(from)));
    }
    if let Some(ref to) = filter.to {
        conditions.push("timestamp <= ?".to_string());
        params.push(Box::new(format_timestamp(to)));
    }

    (conditions, params)
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

/// A row as stored, before the timestamp and payload are parsed.
struct StoredRow {
    id: i64,
    timestamp: String,
    event_type: String,
    enrichment_id: Option<String>,
    user_id: Option<String>,
    status: Option<String>,
    stage: Option<String>,
    data: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            event_type: row.get(2)?,
            enrichment_id: row.get(3)?,
            user_id: row.get(4)?,
            status: row.get(5)?,
            stage: row.get(6)?,
            data: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<AuditRecord, AuditError> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| AuditError::Database(format!("Invalid timestamp: {}", e)))?
            .with_timezone(&Utc);
        let data: AuditEvent = serde_json::from_str(&self.data)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;

        Ok(AuditRecord {
            id: self.id,
            timestamp,
            event_type: self.event_type,
            enrichment_id: self.enrichment_id,
            user_id: self.user_id,
            status: self.status,
            stage: self.stage,
            data,
        })
    }
}

impl AuditStore for SqliteAuditStore {
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let conn = self.lock()?;

        let data_json = serde_json::to_string(&record.data)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO audit_events (timestamp, event_type, enrichment_id, user_id, status, stage, data) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                format_timestamp(&record.timestamp),
                record.event_type,
                record.enrichment_id,
                record.user_id,
                record.status,
                record.stage,
                data_json,
            ],
        )
        .map_err(db_error)?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.lock()?;

        let (conditions, mut params) = conditions(filter);
        let sql = format!(
            "SELECT {} FROM audit_events {} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            COLUMNS,
            where_clause(&conditions)
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let mut stmt = conn.prepare(&sql).map_err(db_error)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), StoredRow::from_row)
            .map_err(db_error)?;

        let records: Result<Vec<_>, _> = rows
            .map(|row| row.map_err(db_error)?.into_record())
            .collect();
        records
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let conn = self.lock()?;

        let (conditions, params) = conditions(filter);
        let sql = format!(
            "SELECT COUNT(*) FROM audit_events {}",
            where_clause(&conditions)
        );

        conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
            .map_err(db_error)
    }

    fn count_by_stage(&self, filter: &AuditFilter) -> Result<BTreeMap<String, i64>, AuditError> {
        let conn = self.lock()?;

        let (mut conditions, params) = conditions(filter);
        conditions.push("stage IS NOT NULL".to_string());
        let sql = format!(
            "SELECT stage, COUNT(*) FROM audit_events {} GROUP BY stage",
            where_clause(&conditions)
        );

        let mut stmt = conn.prepare(&sql).map_err(db_error)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(db_error)?;

        let counts = rows.collect::<Result<BTreeMap<_, _>, _>>();
        counts.map_err(db_error)
    }
}
