use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::middleware::ConversationParticipant;
use crate::models::{ContentType, Message, MessagePosition, NewMessage};
use crate::services::cursor::{
    clamp_limit, CursorCodec, CursorPosition, Direction, MessageCursor, MAX_MESSAGE_PAGE,
};
use crate::services::idempotency::{IdempotencyGuard, Submission};
use crate::services::now_micros;
use crate::services::ordering::ConversationLocks;
use crate::services::rate_limiter::{Bucket, RateLimiter};
use crate::store::{ChatStore, MessageWindow};
use crate::websocket::{ConnectionRegistry, OutboundEvent};

/// Reference bodies (`image_ref`, `file_ref`) are opaque handles from the media service
pub const MAX_REF_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub content_type: ContentType,
    pub idempotency_key: Option<String>,
}

/// Bounds of a message list request; at most one may be set
#[derive(Debug, Clone, Default)]
pub struct ListMessages {
    pub before_id: Option<Uuid>,
    pub after_id: Option<Uuid>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct MessagePage {
    /// Ascending by `(created_at, id)`
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
    pub limit: usize,
}

pub fn validate_content(content: &str, content_type: ContentType, max_text_chars: usize) -> AppResult<()> {
    if content.trim().is_empty() {
        return Err(AppError::Validation("content must not be blank".into()));
    }

    let max = match content_type {
        ContentType::Text => max_text_chars,
        ContentType::ImageRef | ContentType::FileRef => MAX_REF_CHARS,
    };
    if content.chars().count() > max {
        return Err(AppError::Validation(format!(
            "{content_type} content exceeds {max} characters"
        )));
    }
    Ok(())
}

/// Next commit timestamp: wall clock, but strictly after the conversation's last message
fn next_timestamp(last_message_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = now_micros();
    match last_message_at {
        Some(last) => now.max(last + Duration::microseconds(1)),
        None => now,
    }
}

#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn ChatStore>,
    guard: IdempotencyGuard,
    limiter: Arc<RateLimiter>,
    locks: ConversationLocks,
    registry: ConnectionRegistry,
    cursors: Arc<CursorCodec>,
    max_text_chars: usize,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        guard: IdempotencyGuard,
        limiter: Arc<RateLimiter>,
        locks: ConversationLocks,
        registry: ConnectionRegistry,
        cursors: Arc<CursorCodec>,
        max_text_chars: usize,
    ) -> Self {
        Self {
            store,
            guard,
            limiter,
            locks,
            registry,
            cursors,
            max_text_chars,
        }
    }

    /// Append a message exactly once per idempotency key, then fan it out
    pub async fn send(&self, req: SendMessage) -> AppResult<Submission> {
        self.limiter.enforce(req.sender_id, Bucket::MessageSend)?;
        let key = IdempotencyGuard::require_key(req.idempotency_key.as_deref())?;
        validate_content(&req.content, req.content_type, self.max_text_chars)?;

        let _lock = self.locks.acquire(req.conversation_id).await;

        let participant =
            ConversationParticipant::verify(self.store.as_ref(), req.sender_id, req.conversation_id)
                .await?;
        participant.can_send()?;

        let draft = NewMessage {
            id: Uuid::now_v7(),
            conversation_id: req.conversation_id,
            sender_id: req.sender_id,
            content: req.content,
            content_type: req.content_type,
            created_at: next_timestamp(participant.conversation.last_message_at),
            idempotency_key: Some(key),
        };

        let draft_id = draft.id;
        let submission = match self.guard.submit(draft.clone()).await {
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    conversation_id = %draft.conversation_id,
                    error = %e,
                    "transient store failure, retrying once"
                );
                let mut retried = self.guard.submit(draft).await?;
                // the first attempt committed but its ack was lost: this call still created it
                if retried.message.id == draft_id {
                    retried.created = true;
                }
                retried
            }
            other => other?,
        };

        if submission.created {
            metrics::record_message_created();
            tracing::info!(
                conversation_id = %submission.message.conversation_id,
                message_id = %submission.message.id,
                sender_id = %submission.message.sender_id,
                "message created"
            );

            // still under the conversation lock, so delivery order equals commit order
            self.registry.publish(
                &participant.conversation.participants(),
                submission.message.conversation_id,
                &OutboundEvent::MessageCreated {
                    message: submission.message.clone(),
                },
            );
        } else {
            metrics::record_idempotent_replay();
        }

        Ok(submission)
    }

    pub async fn get(&self, user_id: Uuid, conversation_id: Uuid, message_id: Uuid) -> AppResult<Message> {
        ConversationParticipant::verify(self.store.as_ref(), user_id, conversation_id).await?;

        self.store
            .get_message(message_id)
            .await?
            .filter(|m| m.conversation_id == conversation_id)
            .ok_or(AppError::NotFound("message"))
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        query: ListMessages,
    ) -> AppResult<MessagePage> {
        let bounds = [
            query.before_id.is_some(),
            query.after_id.is_some(),
            query.cursor.is_some(),
        ];
        if bounds.iter().filter(|set| **set).count() > 1 {
            return Err(AppError::Validation(
                "at most one of before_id, after_id and cursor may be given".into(),
            ));
        }

        let limit = clamp_limit(query.limit, MAX_MESSAGE_PAGE);
        ConversationParticipant::verify(self.store.as_ref(), user_id, conversation_id).await?;

        let window = if let Some(id) = query.before_id {
            MessageWindow::Before(self.anchor(conversation_id, id, "before_id").await?)
        } else if let Some(id) = query.after_id {
            MessageWindow::After(self.anchor(conversation_id, id, "after_id").await?)
        } else if let Some(token) = query.cursor.as_deref() {
            let cursor = self.cursors.decode_message(token)?;
            match cursor.direction {
                Direction::Before => MessageWindow::Before(cursor.position),
                Direction::After => MessageWindow::After(cursor.position),
            }
        } else {
            MessageWindow::Latest
        };

        // one extra row tells whether another page exists
        let mut messages = self
            .store
            .list_messages(conversation_id, window, limit + 1)
            .await?;
        let has_more = messages.len() > limit;

        let next = match window {
            MessageWindow::After(_) => {
                messages.truncate(limit);
                messages.last().map(|m| (Direction::After, m.position()))
            }
            MessageWindow::Latest | MessageWindow::Before(_) => {
                if has_more {
                    messages.remove(0);
                }
                messages.first().map(|m| (Direction::Before, m.position()))
            }
        };

        let next_cursor = next.filter(|_| has_more).map(|(direction, position)| {
            self.cursors
                .encode(&CursorPosition::Message(MessageCursor { direction, position }))
        });

        Ok(MessagePage {
            messages,
            has_more,
            next_cursor,
            limit,
        })
    }

    async fn anchor(&self, conversation_id: Uuid, message_id: Uuid, param: &str) -> AppResult<MessagePosition> {
        self.store
            .get_message(message_id)
            .await?
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.position())
            .ok_or_else(|| {
                AppError::Validation(format!("{param} does not reference a message in this conversation"))
            })
    }
}
