use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a message as it moves through the pipeline.
///
/// Serialized as its integer ordinal so snapshot files and broker bodies
/// keep the persisted-state layout stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageStatus {
    Created,
    Sent,
    Received,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid message status ordinal: {0}")]
pub struct InvalidStatus(pub u8);

impl From<MessageStatus> for u8 {
    fn from(status: MessageStatus) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for MessageStatus {
    type Error = InvalidStatus;

    fn try_from(ordinal: u8) -> Result<Self, InvalidStatus> {
        match ordinal {
            0 => Ok(MessageStatus::Created),
            1 => Ok(MessageStatus::Sent),
            2 => Ok(MessageStatus::Received),
            3 => Ok(MessageStatus::Processing),
            4 => Ok(MessageStatus::Completed),
            5 => Ok(MessageStatus::Failed),
            other => Err(InvalidStatus(other)),
        }
    }
}

/// Core message domain type carried from transport to sink. The serde field
/// names are the stable wire names shared by the snapshot file and the
/// broker body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(rename = "MessageId")]
    pub id: Uuid,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "SourceSystem")]
    pub source: String,
    #[serde(rename = "Payload")]
    pub payload: String,
    #[serde(rename = "Status")]
    pub status: MessageStatus,
}

impl Message {
    /// Build a message with a fresh UUIDv7 id and the current UTC instant.
    pub fn new(source: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            source: source.into(),
            payload: payload.into(),
            status: MessageStatus::Created,
        }
    }

    /// A message is processable only when both source and payload carry
    /// non-whitespace content.
    pub fn is_valid(&self) -> bool {
        !self.source.trim().is_empty() && !self.payload.trim().is_empty()
    }
}

/// A message after transformation, as persisted by the sink. One row per
/// message id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedRecord {
    #[serde(rename = "MessageId")]
    pub id: Uuid,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "SourceSystem")]
    pub source: String,
    #[serde(rename = "Payload")]
    pub payload: String,
    #[serde(rename = "Status")]
    pub status: MessageStatus,
    #[serde(rename = "ProcessedAt")]
    pub processed_at: DateTime<Utc>,
}
