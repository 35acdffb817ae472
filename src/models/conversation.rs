use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Two-party conversation
///
/// Participants are immutable and stored canonically (`participant_low < participant_high`),
/// so a pair of users maps to exactly one conversation regardless of who opened it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_low: Uuid,
    pub participant_high: Uuid,
    /// Set while a block edge exists in either direction
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Order a user pair the way it is stored
    pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn participants(&self) -> [Uuid; 2] {
        [self.participant_low, self.participant_high]
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participant_low == user_id || self.participant_high == user_id
    }

    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if user_id == self.participant_low {
            Some(self.participant_high)
        } else if user_id == self.participant_high {
            Some(self.participant_low)
        } else {
            None
        }
    }

    /// Timestamp the conversation list is sorted by
    pub fn sort_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }

    pub fn position(&self) -> ConversationPosition {
        ConversationPosition {
            sort_at: self.sort_at(),
            id: self.id,
        }
    }
}

/// Position in the by-user conversation list, ordered `(sort_at, id)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConversationPosition {
    pub sort_at: DateTime<Utc>,
    pub id: Uuid,
}

/// Conversation as seen by one participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub unread_count: i64,
}
