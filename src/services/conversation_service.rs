use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::ConversationParticipant;
use crate::models::{Conversation, ConversationSummary, ReadState};
use crate::services::cursor::{
    clamp_limit, ConversationCursor, CursorCodec, CursorPosition, MAX_CONVERSATION_PAGE,
};
use crate::services::now_micros;
use crate::store::{ChatStore, ConversationQuery};

/// Matching collaborator: decides whether two users may open a conversation
#[async_trait]
pub trait MatchPolicy: Send + Sync {
    async fn is_matched(&self, a: Uuid, b: Uuid) -> AppResult<bool>;
}

/// Lets every pair talk; used when no matching service is wired in
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllMatches;

#[async_trait]
impl MatchPolicy for AllowAllMatches {
    async fn is_matched(&self, _a: Uuid, _b: Uuid) -> AppResult<bool> {
        Ok(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListConversations {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    pub unread_only: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationPage {
    pub items: Vec<ConversationSummary>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
    pub limit: usize,
}

/// A conversation with the caller's unread count and both watermarks
#[derive(Debug, Clone)]
pub struct ConversationDetail {
    pub conversation: Conversation,
    pub unread_count: i64,
    pub read_states: Vec<ReadState>,
}

#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ChatStore>,
    cursors: Arc<CursorCodec>,
    matches: Arc<dyn MatchPolicy>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ChatStore>, cursors: Arc<CursorCodec>, matches: Arc<dyn MatchPolicy>) -> Self {
        Self {
            store,
            cursors,
            matches,
        }
    }

    /// Open (or return) the pair's conversation; `true` when it was created
    pub async fn open(&self, user_id: Uuid, participant_id: Uuid) -> AppResult<(Conversation, bool)> {
        if user_id == participant_id {
            return Err(AppError::Validation(
                "cannot open a conversation with yourself".into(),
            ));
        }

        if let Some(existing) = self.store.find_conversation_by_pair(user_id, participant_id).await? {
            return Ok((existing, false));
        }

        if !self.matches.is_matched(user_id, participant_id).await? {
            return Err(AppError::Forbidden("users are not matched".into()));
        }

        let (conversation, created) = self
            .store
            .open_conversation(user_id, participant_id, now_micros())
            .await?;
        if created {
            tracing::info!(
                conversation_id = %conversation.id,
                opened_by = %user_id,
                "conversation opened"
            );
        }
        Ok((conversation, created))
    }

    pub async fn detail(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<ConversationDetail> {
        let participant =
            ConversationParticipant::verify(self.store.as_ref(), user_id, conversation_id).await?;

        let unread_count = self.store.unread_count(conversation_id, user_id).await?;
        let read_states = self.store.list_read_states(conversation_id).await?;

        Ok(ConversationDetail {
            conversation: participant.conversation,
            unread_count,
            read_states,
        })
    }

    pub async fn list(&self, user_id: Uuid, query: ListConversations) -> AppResult<ConversationPage> {
        let limit = clamp_limit(query.limit, MAX_CONVERSATION_PAGE);
        let before = query
            .cursor
            .as_deref()
            .map(|token| self.cursors.decode_conversation(token))
            .transpose()?
            .map(|c| c.position);

        let mut items = self
            .store
            .list_conversations(
                user_id,
                &ConversationQuery {
                    before,
                    limit: limit + 1,
                    unread_only: query.unread_only,
                },
            )
            .await?;

        let has_more = items.len() > limit;
        items.truncate(limit);

        let next_cursor = items.last().filter(|_| has_more).map(|last| {
            self.cursors
                .encode(&CursorPosition::Conversation(ConversationCursor {
                    position: last.conversation.position(),
                }))
        });

        Ok(ConversationPage {
            items,
            has_more,
            next_cursor,
            limit,
        })
    }
}
