//! Durable chat storage
//!
//! `ChatStore` is the single writer of truth for conversations, messages, read-states and
//! the safety ledger. `PgChatStore` backs production; `MemoryChatStore` backs tests and
//! local development with identical semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Conversation, ConversationPosition, ConversationSummary, Message, MessagePosition, NewMessage,
    NewReport, ReadState, Report,
};

pub mod memory;
pub mod postgres;

pub use memory::{FailPoint, MemoryChatStore};
pub use postgres::PgChatStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A live idempotency key already exists for (conversation, sender, key)
    #[error("unique constraint violated")]
    UniqueViolation,

    /// Timeout or connection loss; the operation may be retried
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Slice of a conversation's message log, always returned ascending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageWindow {
    /// The newest messages
    Latest,
    /// Messages strictly before the position
    Before(MessagePosition),
    /// Messages strictly after the position
    After(MessagePosition),
}

/// One page of a user's conversation list, newest activity first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationQuery {
    /// Exclusive upper bound on `(sort_at, id)`
    pub before: Option<ConversationPosition>,
    pub limit: usize,
    pub unread_only: bool,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Return the pair's conversation, creating it if needed; `true` when created.
    /// A new conversation starts `blocked` if a block edge already exists for the pair.
    async fn open_conversation(
        &self,
        a: Uuid,
        b: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Conversation, bool), StoreError>;

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError>;

    async fn find_conversation_by_pair(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<Option<Conversation>, StoreError>;

    async fn list_conversations(
        &self,
        user_id: Uuid,
        query: &ConversationQuery,
    ) -> Result<Vec<ConversationSummary>, StoreError>;

    /// Messages from the other participant after the user's watermark
    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> Result<i64, StoreError>;

    /// Message recorded under a key that has not expired at `now`
    async fn find_message_by_key(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError>;

    /// Append a message and bump `last_message_at` atomically.
    ///
    /// With `key_expires_at`, also claims the message's idempotency key until that instant;
    /// a live claim held by another message fails with [`StoreError::UniqueViolation`] and
    /// nothing is written. Expired claims are taken over.
    async fn insert_message(
        &self,
        message: &NewMessage,
        key_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Message, StoreError>;

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError>;

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        window: MessageWindow,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    async fn get_read_state(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ReadState>, StoreError>;

    async fn list_read_states(&self, conversation_id: Uuid) -> Result<Vec<ReadState>, StoreError>;

    /// Move the watermark to `up_to` if it is strictly later than the stored one, stamping
    /// `read_at` on the other participant's unread messages up to it. `false` on no-op.
    async fn advance_read_state(
        &self,
        user_id: Uuid,
        up_to: &Message,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `true` when the edge is new
    async fn insert_block(
        &self,
        blocker_id: Uuid,
        target_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `true` when an edge was removed
    async fn delete_block(&self, blocker_id: Uuid, target_id: Uuid) -> Result<bool, StoreError>;

    /// Re-evaluate `blocked` for the pair's conversation from both edge directions
    async fn refresh_blocked_flag(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<Option<Conversation>, StoreError>;

    async fn insert_report(&self, report: &NewReport) -> Result<Report, StoreError>;

    /// Drop idempotency claims that expired before `now`; returns how many
    async fn purge_expired_idempotency_keys(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
