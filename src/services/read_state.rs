use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::ConversationParticipant;
use crate::models::ReadState;
use crate::services::now_micros;
use crate::services::ordering::ConversationLocks;
use crate::store::ChatStore;
use crate::websocket::{ConnectionRegistry, OutboundEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Advanced(ReadState),
    /// The requested position was not later than the stored watermark
    Unchanged,
}

/// Monotonic per-participant read watermarks
#[derive(Clone)]
pub struct ReadStateTracker {
    store: Arc<dyn ChatStore>,
    locks: ConversationLocks,
    registry: ConnectionRegistry,
}

impl ReadStateTracker {
    pub fn new(store: Arc<dyn ChatStore>, locks: ConversationLocks, registry: ConnectionRegistry) -> Self {
        Self {
            store,
            locks,
            registry,
        }
    }

    pub async fn set_read(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        up_to_message_id: Uuid,
    ) -> AppResult<ReadOutcome> {
        let _lock = self.locks.acquire(conversation_id).await;

        let participant =
            ConversationParticipant::verify(self.store.as_ref(), user_id, conversation_id).await?;

        let message = self
            .store
            .get_message(up_to_message_id)
            .await?
            .ok_or(AppError::NotFound("message"))?;
        if message.conversation_id != conversation_id {
            return Err(AppError::Validation(
                "message belongs to another conversation".into(),
            ));
        }

        let now = now_micros();
        if !self.store.advance_read_state(user_id, &message, now).await? {
            return Ok(ReadOutcome::Unchanged);
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            user_id = %user_id,
            up_to_message_id = %message.id,
            "read watermark advanced"
        );

        self.registry.publish(
            &[participant.other_participant()],
            conversation_id,
            &OutboundEvent::MessageRead {
                conversation_id,
                reader_id: user_id,
                up_to_message_id: message.id,
                read_at: now,
            },
        );

        Ok(ReadOutcome::Advanced(ReadState {
            conversation_id,
            user_id,
            last_read_message_id: message.id,
            last_read_message_created_at: message.created_at,
            last_read_at: now,
        }))
    }
}
