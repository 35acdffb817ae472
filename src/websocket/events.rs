use chrono::{DateTime, Utc};
use error_types::ErrorBody;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::error_handling::error_body;
use crate::models::Message;

/// Outbound channel frames, server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "session.authenticated")]
    SessionAuthenticated { user_id: Uuid },

    /// `all` is set when the scope covers every conversation of the user
    #[serde(rename = "session.subscribed")]
    SessionSubscribed {
        all: bool,
        conversation_ids: Vec<Uuid>,
    },

    /// Sent only to the connection that issued `message.send`
    #[serde(rename = "message.ack")]
    MessageAck {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        message_id: Uuid,
        conversation_id: Uuid,
        created: bool,
    },

    #[serde(rename = "message.created")]
    MessageCreated { message: Message },

    #[serde(rename = "message.read")]
    MessageRead {
        conversation_id: Uuid,
        reader_id: Uuid,
        up_to_message_id: Uuid,
        read_at: DateTime<Utc>,
    },

    #[serde(rename = "conversation.typing")]
    ConversationTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    #[serde(rename = "conversation.blocked")]
    ConversationBlocked { conversation_id: Uuid, blocked: bool },

    #[serde(rename = "error")]
    Error(ErrorBody),
}

impl OutboundEvent {
    /// Frames the client did not tag get a server-generated id
    pub fn error(err: &AppError, request_id: Option<String>) -> Self {
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        OutboundEvent::Error(error_body(err).with_request_id(request_id))
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            OutboundEvent::SessionAuthenticated { .. } => "session.authenticated",
            OutboundEvent::SessionSubscribed { .. } => "session.subscribed",
            OutboundEvent::MessageAck { .. } => "message.ack",
            OutboundEvent::MessageCreated { .. } => "message.created",
            OutboundEvent::MessageRead { .. } => "message.read",
            OutboundEvent::ConversationTyping { .. } => "conversation.typing",
            OutboundEvent::ConversationBlocked { .. } => "conversation.blocked",
            OutboundEvent::Error(_) => "error",
        }
    }

    /// Ephemeral events are dropped rather than closing a slow connection
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, OutboundEvent::ConversationTyping { .. })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, event = self.event_type(), "failed to serialize event");
            String::from(r#"{"type":"error","code":"internal","message":"internal server error"}"#)
        })
    }
}
