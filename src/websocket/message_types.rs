use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::ContentType;

/// Inbound channel frames, client to server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum InboundFrame {
    #[serde(rename = "auth")]
    Auth { token: String },

    /// An empty list subscribes to every conversation of the user
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(default)]
        conversation_ids: Vec<Uuid>,
    },

    #[serde(rename = "message.send")]
    MessageSend {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        content_type: ContentType,
        #[serde(default)]
        idempotency_key: Option<String>,
        #[serde(default)]
        request_id: Option<String>,
    },

    #[serde(rename = "read.set")]
    ReadSet {
        conversation_id: Uuid,
        up_to_message_id: Uuid,
        #[serde(default)]
        request_id: Option<String>,
    },

    #[serde(rename = "typing.set")]
    TypingSet {
        conversation_id: Uuid,
        is_typing: bool,
    },
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, AppError> {
        serde_json::from_str(text).map_err(|e| AppError::Validation(format!("invalid frame: {e}")))
    }

    pub fn request_id(&self) -> Option<String> {
        match self {
            InboundFrame::MessageSend { request_id, .. } | InboundFrame::ReadSet { request_id, .. } => {
                request_id.clone()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_send_with_defaults() {
        let id = Uuid::new_v4();
        let frame = InboundFrame::parse(&format!(
            r#"{{"type":"message.send","conversation_id":"{id}","content":"hi"}}"#
        ))
        .unwrap();

        assert_eq!(
            frame,
            InboundFrame::MessageSend {
                conversation_id: id,
                content: "hi".into(),
                content_type: ContentType::Text,
                idempotency_key: None,
                request_id: None,
            }
        );
    }

    #[test]
    fn subscribe_defaults_to_all() {
        let frame = InboundFrame::parse(r#"{"type":"subscribe"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Subscribe {
                conversation_ids: vec![]
            }
        );
    }

    #[test]
    fn unknown_type_is_a_validation_error() {
        let err = InboundFrame::parse(r#"{"type":"presence.set"}"#).unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert!(InboundFrame::parse("not json").is_err());
    }

    #[test]
    fn request_id_is_exposed_for_replies() {
        let frame = InboundFrame::parse(&format!(
            r#"{{"type":"read.set","conversation_id":"{}","up_to_message_id":"{}","request_id":"r7"}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        ))
        .unwrap();
        assert_eq!(frame.request_id().as_deref(), Some("r7"));
    }
}
