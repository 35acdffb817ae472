//! Authorization guards that enforce participant checks at the type level

use std::future::{ready, Ready};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Conversation;
use crate::store::ChatStore;
use actix_middleware::UserId;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};

/// Authenticated caller, resolved by the identity middleware
#[derive(Debug, Clone, Copy)]
pub struct User {
    pub id: Uuid,
}

impl FromRequest for User {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let user_id = req.extensions().get::<UserId>().map(|u| u.0);
        ready(
            user_id
                .map(|id| User { id })
                .ok_or_else(|| AppError::Unauthorized.into()),
        )
    }
}

/// A verified participant of a two-party conversation
#[derive(Debug, Clone)]
pub struct ConversationParticipant {
    pub user_id: Uuid,
    pub conversation: Conversation,
}

impl ConversationParticipant {
    /// Load the conversation and check membership
    ///
    /// Non-participants get `NotFound`, so conversation ids of other users do not leak.
    pub async fn verify(
        store: &dyn ChatStore,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Self, AppError> {
        let conversation = store
            .get_conversation(conversation_id)
            .await?
            .filter(|c| c.is_participant(user_id))
            .ok_or(AppError::NotFound("conversation"))?;

        Ok(Self {
            user_id,
            conversation,
        })
    }

    pub fn other_participant(&self) -> Uuid {
        // verify() guarantees membership
        self.conversation
            .other_participant(self.user_id)
            .unwrap_or(self.user_id)
    }

    pub fn can_send(&self) -> Result<(), AppError> {
        if self.conversation.blocked {
            return Err(AppError::Forbidden("conversation is blocked".into()));
        }
        Ok(())
    }
}
