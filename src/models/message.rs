use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    /// Reference returned by the media collaborator
    ImageRef,
    FileRef,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::ImageRef => "image_ref",
            ContentType::FileRef => "file_ref",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentType::Text),
            "image_ref" => Ok(ContentType::ImageRef),
            "file_ref" => Ok(ContentType::FileRef),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

/// Message struct matching the `messages` table
///
/// Immutable once written except `read_at`, which only moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub content_type: ContentType,
    pub created_at: DateTime<Utc>,
    /// Sender-scoped dedup key; never echoed to clients
    #[serde(skip_serializing)]
    pub idempotency_key: Option<String>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn position(&self) -> MessagePosition {
        MessagePosition {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// Total order of messages within a conversation: `(created_at, id)` ascending
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessagePosition {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

/// Message about to be appended
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub content_type: ContentType,
    pub created_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
}

impl NewMessage {
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content,
            content_type: self.content_type,
            created_at: self.created_at,
            idempotency_key: self.idempotency_key,
            read_at: None,
        }
    }
}
