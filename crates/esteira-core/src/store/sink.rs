use std::fs;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::SinkError;
use crate::message::ProcessedRecord;
use crate::store::convert;

/// Durable, append-only store of processed records keyed by message id.
///
/// Implementations must be thread-safe. The worker treats the sink as a
/// black box: any failure, transient or permanent, is surfaced for the retry
/// and breaker layers to classify.
pub trait Sink: Send + Sync {
    /// Persist a record. A second record with the same id fails with
    /// [`SinkError::DuplicateKey`].
    fn save(&self, record: &ProcessedRecord) -> Result<(), SinkError>;

    /// Fetch the record for `id`, if one was saved.
    fn get_by_id(&self, id: Uuid) -> Result<Option<ProcessedRecord>, SinkError>;

    /// All saved records.
    fn get_all(&self) -> Result<Vec<ProcessedRecord>, SinkError>;
}

/// SQLite-backed sink over the `ProcessedMessages` table. Timestamps are
/// stored as RFC 3339 text so reads round-trip the written record exactly.
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    /// Open or create the database at `path` and bootstrap the schema,
    /// creating the containing directory if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::bootstrap(Connection::open(path)?)
    }

    /// In-memory database, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, SinkError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, SinkError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ProcessedMessages (
                MessageId    TEXT PRIMARY KEY,
                Timestamp    TEXT NOT NULL,
                SourceSystem TEXT NOT NULL,
                Payload      TEXT NOT NULL,
                Status       INTEGER NOT NULL,
                ProcessedAt  TEXT NOT NULL
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessedRecord> {
        let id: String = row.get(0)?;
        let timestamp: String = row.get(1)?;
        let source: String = row.get(2)?;
        let payload: String = row.get(3)?;
        let status: u8 = row.get(4)?;
        let processed_at: String = row.get(5)?;
        Ok(ProcessedRecord {
            id: convert::parse_uuid(0, &id)?,
            timestamp: convert::parse_timestamp(1, &timestamp)?,
            source,
            payload,
            status: convert::parse_status(4, status)?,
            processed_at: convert::parse_timestamp(5, &processed_at)?,
        })
    }
}

impl Sink for SqliteSink {
    fn save(&self, record: &ProcessedRecord) -> Result<(), SinkError> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO ProcessedMessages
                (MessageId, Timestamp, SourceSystem, Payload, Status, ProcessedAt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.to_string(),
                record.timestamp.to_rfc3339(),
                record.source,
                record.payload,
                u8::from(record.status),
                record.processed_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) if convert::is_unique_violation(&err) => {
                Err(SinkError::DuplicateKey(record.id))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn get_by_id(&self, id: Uuid) -> Result<Option<ProcessedRecord>, SinkError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT MessageId, Timestamp, SourceSystem, Payload, Status, ProcessedAt
                 FROM ProcessedMessages WHERE MessageId = ?1",
                params![id.to_string()],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn get_all(&self) -> Result<Vec<ProcessedRecord>, SinkError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT MessageId, Timestamp, SourceSystem, Payload, Status, ProcessedAt
             FROM ProcessedMessages ORDER BY MessageId",
        )?;
        let rows = stmt.query_map([], Self::row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
