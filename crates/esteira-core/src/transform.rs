use chrono::{DateTime, Utc};

use crate::message::{Message, MessageStatus, ProcessedRecord};

/// Prefix applied to every transformed payload.
pub const PROCESSED_PREFIX: &str = "PROCESSED_";

/// Map an inbound message to its processed record, stamped with the given
/// instant. Pure: identical inputs produce identical records.
pub fn transform_at(message: &Message, processed_at: DateTime<Utc>) -> ProcessedRecord {
    ProcessedRecord {
        id: message.id,
        timestamp: message.timestamp,
        source: message.source.clone(),
        payload: format!("{PROCESSED_PREFIX}{}", message.payload),
        status: MessageStatus::Processing,
        processed_at,
    }
}

/// [`transform_at`] stamped with the current UTC instant.
pub fn transform(message: &Message) -> ProcessedRecord {
    transform_at(message, Utc::now())
}
