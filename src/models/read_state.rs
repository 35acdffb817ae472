use super::message::MessagePosition;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Read watermark of one participant in one conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadState {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub last_read_message_id: Uuid,
    /// Copy of the watermark message's `created_at`, so comparisons need no join
    #[serde(skip)]
    pub last_read_message_created_at: DateTime<Utc>,
    pub last_read_at: DateTime<Utc>,
}

impl ReadState {
    pub fn position(&self) -> MessagePosition {
        MessagePosition {
            created_at: self.last_read_message_created_at,
            id: self.last_read_message_id,
        }
    }
}
