use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::AuditError;
use crate::store::convert;

/// Outcome column of an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Processing,
    Completed,
    Failed,
}

impl AuditStatus {
    fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Processing => "Processing",
            AuditStatus::Completed => "Completed",
            AuditStatus::Failed => "Failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown audit status: {0}")]
struct UnknownAuditStatus(String);

fn parse_audit_status(index: usize, raw: &str) -> rusqlite::Result<AuditStatus> {
    match raw {
        "Processing" => Ok(AuditStatus::Processing),
        "Completed" => Ok(AuditStatus::Completed),
        "Failed" => Ok(AuditStatus::Failed),
        other => Err(convert::decode_error(
            index,
            Type::Text,
            UnknownAuditStatus(other.to_string()),
        )),
    }
}

/// One processing attempt as recorded in `AuditLogs`. `end_time` and
/// `duration_ms` are present exactly when the status is no longer
/// `Processing`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub id: i64,
    pub message_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
}

/// Aggregates over audit rows that finished (non-null duration).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuditStatistics {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    /// `100 * success / total`, or 0 when nothing finished yet.
    pub success_rate: f64,
}

/// SQLite-backed audit trail: start/end timestamps, duration, outcome and
/// error text per message. `MessageId` is unique at the store, so a repeated
/// `log_start` is a store error the caller must not drive.
pub struct AuditStore {
    conn: Mutex<Connection>,
}

impl AuditStore {
    /// Open or create the database at `path` and bootstrap the schema,
    /// creating the containing directory if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::bootstrap(Connection::open(path)?)
    }

    /// In-memory database, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, AuditError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS AuditLogs (
                Id           INTEGER PRIMARY KEY AUTOINCREMENT,
                MessageId    TEXT UNIQUE,
                StartTime    TEXT NOT NULL,
                EndTime      TEXT NULL,
                DurationMs   REAL NULL,
                Status       TEXT NOT NULL,
                ErrorMessage TEXT NULL
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Record the start of processing for `message_id`.
    pub fn log_start(&self, message_id: Uuid) -> Result<(), AuditError> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO AuditLogs (MessageId, StartTime, Status) VALUES (?1, ?2, ?3)",
            params![
                message_id.to_string(),
                Utc::now().to_rfc3339(),
                AuditStatus::Processing.as_str(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) if convert::is_unique_violation(&err) => {
                Err(AuditError::DuplicateMessageId(message_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Close the audit row for `message_id`, computing its duration from the
    /// recorded start. A `log_end` without a matching `log_start` is a
    /// silent no-op.
    pub fn log_end(
        &self,
        message_id: Uuid,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<(), AuditError> {
        let conn = self.conn.lock();
        let start_time = conn
            .query_row(
                "SELECT StartTime FROM AuditLogs WHERE MessageId = ?1",
                params![message_id.to_string()],
                |row| {
                    let raw: String = row.get(0)?;
                    convert::parse_timestamp(0, &raw)
                },
            )
            .optional()?;
        let Some(start_time) = start_time else {
            return Ok(());
        };

        let end_time = Utc::now();
        let elapsed = end_time.signed_duration_since(start_time);
        let duration_ms = elapsed
            .num_microseconds()
            .map(|us| us as f64 / 1_000.0)
            .unwrap_or_else(|| elapsed.num_milliseconds() as f64);
        let status = if success {
            AuditStatus::Completed
        } else {
            AuditStatus::Failed
        };

        conn.execute(
            "UPDATE AuditLogs
             SET EndTime = ?2, DurationMs = ?3, Status = ?4, ErrorMessage = ?5
             WHERE MessageId = ?1",
            params![
                message_id.to_string(),
                end_time.to_rfc3339(),
                duration_ms,
                status.as_str(),
                error_message,
            ],
        )?;
        Ok(())
    }

    pub fn get_by_id(&self, message_id: Uuid) -> Result<Option<AuditRow>, AuditError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT Id, MessageId, StartTime, EndTime, DurationMs, Status, ErrorMessage
                 FROM AuditLogs WHERE MessageId = ?1",
                params![message_id.to_string()],
                Self::row_to_audit,
            )
            .optional()?;
        Ok(row)
    }

    /// Every audit row, newest first by start time.
    pub fn get_all(&self) -> Result<Vec<AuditRow>, AuditError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT Id, MessageId, StartTime, EndTime, DurationMs, Status, ErrorMessage
             FROM AuditLogs ORDER BY StartTime DESC, Id DESC",
        )?;
        let rows = stmt.query_map([], Self::row_to_audit)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Aggregates over rows that finished. Rows still `Processing` (null
    /// duration) are excluded.
    pub fn statistics(&self) -> Result<AuditStatistics, AuditError> {
        let conn = self.conn.lock();
        let (total, success, failure, avg, min, max) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN Status = 'Completed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN Status = 'Failed' THEN 1 ELSE 0 END), 0),
                    COALESCE(AVG(DurationMs), 0.0),
                    COALESCE(MIN(DurationMs), 0.0),
                    COALESCE(MAX(DurationMs), 0.0)
             FROM AuditLogs WHERE DurationMs IS NOT NULL",
            [],
            |row| {
                Ok((
                    row.get::<_, u64>(0)?,
                    row.get::<_, u64>(1)?,
                    row.get::<_, u64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            },
        )?;

        let success_rate = if total == 0 {
            0.0
        } else {
            100.0 * success as f64 / total as f64
        };
        Ok(AuditStatistics {
            total,
            success,
            failure,
            avg_duration_ms: avg,
            min_duration_ms: min,
            max_duration_ms: max,
            success_rate,
        })
    }

    fn row_to_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRow> {
        let message_id: String = row.get(1)?;
        let start_time: String = row.get(2)?;
        let end_time: Option<String> = row.get(3)?;
        let status: String = row.get(5)?;
        Ok(AuditRow {
            id: row.get(0)?,
            message_id: convert::parse_uuid(1, &message_id)?,
            start_time: convert::parse_timestamp(2, &start_time)?,
            end_time: end_time
                .map(|raw| convert::parse_timestamp(3, &raw))
                .transpose()?,
            duration_ms: row.get(4)?,
            status: parse_audit_status(5, &status)?,
            error_message: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn log_start_creates_a_processing_row() {
        let store = AuditStore::open_in_memory().unwrap();
        let id = Uuid::now_v7();
        store.log_start(id).unwrap();

        let row = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(row.status, AuditStatus::Processing);
        assert!(row.end_time.is_none());
        assert!(row.duration_ms.is_none());
        assert!(row.error_message.is_none());
    }

    #[test]
    fn log_end_completes_the_row_with_duration() {
        let store = AuditStore::open_in_memory().unwrap();
        let id = Uuid::now_v7();
        store.log_start(id).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        store.log_end(id, true, None).unwrap();

        let row = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(row.status, AuditStatus::Completed);
        assert!(row.end_time.unwrap() >= row.start_time);
        assert!(row.duration_ms.unwrap() > 0.0);
    }

    #[test]
    fn log_end_failure_records_the_error_text() {
        let store = AuditStore::open_in_memory().unwrap();
        let id = Uuid::now_v7();
        store.log_start(id).unwrap();
        store.log_end(id, false, Some("Validation failed")).unwrap();

        let row = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(row.status, AuditStatus::Failed);
        assert_eq!(row.error_message.as_deref(), Some("Validation failed"));
    }

    #[test]
    fn log_end_without_start_is_a_no_op() {
        let store = AuditStore::open_in_memory().unwrap();
        let id = Uuid::now_v7();
        store.log_end(id, true, None).unwrap();
        assert!(store.get_by_id(id).unwrap().is_none());
    }

    #[test]
    fn repeated_log_start_is_a_store_error() {
        let store = AuditStore::open_in_memory().unwrap();
        let id = Uuid::now_v7();
        store.log_start(id).unwrap();

        let err = store.log_start(id).unwrap_err();
        assert!(matches!(err, AuditError::DuplicateMessageId(dup) if dup == id));
    }

    #[test]
    fn last_log_end_wins_the_status() {
        let store = AuditStore::open_in_memory().unwrap();
        let id = Uuid::now_v7();
        store.log_start(id).unwrap();
        store.log_end(id, false, Some("first failure")).unwrap();
        store.log_end(id, true, None).unwrap();

        let row = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(row.status, AuditStatus::Completed);
    }

    #[test]
    fn get_all_is_newest_first() {
        let store = AuditStore::open_in_memory().unwrap();
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();
        store.log_start(first).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.log_start(second).unwrap();

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message_id, second);
        assert_eq!(all[1].message_id, first);
    }

    #[test]
    fn statistics_cover_only_finished_rows() {
        let store = AuditStore::open_in_memory().unwrap();

        let done = Uuid::now_v7();
        store.log_start(done).unwrap();
        store.log_end(done, true, None).unwrap();

        let failed = Uuid::now_v7();
        store.log_start(failed).unwrap();
        store.log_end(failed, false, Some("boom")).unwrap();

        // Still processing: must not count.
        store.log_start(Uuid::now_v7()).unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failure, 1);
        assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);
        assert!(stats.min_duration_ms <= stats.avg_duration_ms);
        assert!(stats.avg_duration_ms <= stats.max_duration_ms);
    }

    #[test]
    fn statistics_on_empty_store_are_zero() {
        let store = AuditStore::open_in_memory().unwrap();
        let stats = store.statistics().unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn reopen_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let id = Uuid::now_v7();

        {
            let store = AuditStore::open(&path).unwrap();
            store.log_start(id).unwrap();
            store.log_end(id, true, None).unwrap();
        }

        let store = AuditStore::open(&path).unwrap();
        let row = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(row.status, AuditStatus::Completed);
    }
}
