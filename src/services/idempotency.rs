use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Message, NewMessage};
use crate::store::{ChatStore, StoreError};

/// Outcome of a keyed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// `false` when an earlier write under the same key was returned
    pub created: bool,
    pub message: Message,
}

/// Exactly-once message creation per `(conversation, sender, key)` inside a window
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn ChatStore>,
    window: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn ChatStore>, window: Duration) -> Self {
        Self { store, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Validate a client-supplied key; write endpoints call this before touching storage
    pub fn require_key(key: Option<&str>) -> AppResult<String> {
        let raw = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Validation("idempotency key is required".into()))?;

        Uuid::parse_str(raw)
            .map(|k| k.hyphenated().to_string())
            .map_err(|_| AppError::Validation("idempotency key must be a UUID".into()))
    }

    pub async fn submit(&self, draft: NewMessage) -> Result<Submission, StoreError> {
        let Some(key) = draft.idempotency_key.clone() else {
            let message = self.store.insert_message(&draft, None).await?;
            return Ok(Submission {
                created: true,
                message,
            });
        };

        if let Some(existing) = self.replay(&draft, &key).await? {
            return Ok(existing);
        }

        let expires_at = draft.created_at + self.window;
        match self.store.insert_message(&draft, Some(expires_at)).await {
            Ok(message) => Ok(Submission {
                created: true,
                message,
            }),
            // lost the race to a concurrent writer holding the same key
            Err(StoreError::UniqueViolation) => self
                .replay(&draft, &key)
                .await?
                .ok_or(StoreError::UniqueViolation),
            Err(e) => Err(e),
        }
    }

    async fn replay(&self, draft: &NewMessage, key: &str) -> Result<Option<Submission>, StoreError> {
        let existing = self
            .store
            .find_message_by_key(draft.conversation_id, draft.sender_id, key, draft.created_at)
            .await?;

        Ok(existing.map(|message| {
            tracing::debug!(
                conversation_id = %draft.conversation_id,
                message_id = %message.id,
                "idempotent replay"
            );
            Submission {
                created: false,
                message,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;
    use crate::services::now_micros;
    use crate::store::MemoryChatStore;

    async fn setup() -> (Arc<MemoryChatStore>, IdempotencyGuard, Uuid, Uuid) {
        let store = Arc::new(MemoryChatStore::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conversation, _) = store.open_conversation(a, b, now_micros()).await.unwrap();
        let guard = IdempotencyGuard::new(store.clone(), Duration::hours(24));
        (store, guard, conversation.id, a)
    }

    fn draft(conversation_id: Uuid, sender: Uuid, key: Option<&str>) -> NewMessage {
        NewMessage {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id: sender,
            content: "hi".into(),
            content_type: ContentType::Text,
            created_at: now_micros(),
            idempotency_key: key.map(str::to_string),
        }
    }

    #[test]
    fn key_must_be_a_uuid() {
        assert!(IdempotencyGuard::require_key(None).is_err());
        assert!(IdempotencyGuard::require_key(Some("  ")).is_err());
        assert!(IdempotencyGuard::require_key(Some("abc")).is_err());

        let key = IdempotencyGuard::require_key(Some("6F9619FF-8B86-D011-B42D-00C04FC964FF")).unwrap();
        assert_eq!(key, "6f9619ff-8b86-d011-b42d-00c04fc964ff");
    }

    #[tokio::test]
    async fn same_key_returns_same_message() {
        let (store, guard, conversation_id, sender) = setup().await;
        let key = Uuid::new_v4().to_string();

        let first = guard.submit(draft(conversation_id, sender, Some(&key))).await.unwrap();
        let second = guard.submit(draft(conversation_id, sender, Some(&key))).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.message.id, second.message.id);
        assert_eq!(store.message_count(conversation_id).await, 1);
    }

    #[tokio::test]
    async fn no_key_means_no_dedup() {
        let (store, guard, conversation_id, sender) = setup().await;

        guard.submit(draft(conversation_id, sender, None)).await.unwrap();
        guard.submit(draft(conversation_id, sender, None)).await.unwrap();

        assert_eq!(store.message_count(conversation_id).await, 2);
    }

    #[tokio::test]
    async fn concurrent_submissions_store_one_row() {
        let (store, guard, conversation_id, sender) = setup().await;
        let key = Uuid::new_v4().to_string();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                let d = draft(conversation_id, sender, Some(&key));
                tokio::spawn(async move { guard.submit(d).await })
            })
            .collect();

        let mut ids = Vec::new();
        let mut created = 0;
        for task in tasks {
            let submission = task.await.unwrap().unwrap();
            created += usize::from(submission.created);
            ids.push(submission.message.id);
        }

        assert_eq!(created, 1);
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.message_count(conversation_id).await, 1);
    }
}
