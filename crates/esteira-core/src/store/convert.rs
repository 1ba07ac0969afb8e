//! Row-decode helpers shared by the SQLite-backed stores. Stored values that
//! fail to parse surface as `FromSqlConversionFailure` so they travel through
//! the usual `rusqlite::Error` channel.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

use crate::message::MessageStatus;

pub(super) fn decode_error(
    index: usize,
    ty: Type,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, ty, Box::new(err))
}

pub(super) fn parse_uuid(index: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| decode_error(index, Type::Text, e))
}

pub(super) fn parse_timestamp(index: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_error(index, Type::Text, e))
}

pub(super) fn parse_status(index: usize, ordinal: u8) -> rusqlite::Result<MessageStatus> {
    MessageStatus::try_from(ordinal).map_err(|e| decode_error(index, Type::Integer, e))
}

/// True when the error is SQLite's unique/primary-key constraint violation.
pub(super) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
