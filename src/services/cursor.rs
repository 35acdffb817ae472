//! Opaque pagination cursors
//!
//! A token is `base64url(json payload) "." base64url(hmac_sha256(payload)[..16])`.
//! The tag makes tokens tamper-evident; positions are exclusive bounds.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::DateTime;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ConversationPosition, MessagePosition};

type HmacSha256 = Hmac<Sha256>;

const CURSOR_VERSION: u8 = 1;
const TAG_LEN: usize = 16;

pub const MAX_MESSAGE_PAGE: usize = 50;
pub const MAX_CONVERSATION_PAGE: usize = 20;

/// Clamp a requested page size into `[1, max]`; absent means `max`
pub fn clamp_limit(requested: Option<i64>, max: usize) -> usize {
    match requested {
        None => max,
        Some(n) if n < 1 => 1,
        Some(n) => usize::try_from(n).map_or(max, |n| n.min(max)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCursor {
    pub direction: Direction,
    pub position: MessagePosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationCursor {
    pub position: ConversationPosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPosition {
    Message(MessageCursor),
    Conversation(ConversationCursor),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Kind {
    #[serde(rename = "m")]
    Message,
    #[serde(rename = "c")]
    Conversation,
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    v: u8,
    k: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    d: Option<Direction>,
    /// microseconds since epoch
    t: i64,
    id: Uuid,
}

fn invalid() -> AppError {
    AppError::Validation("invalid cursor".into())
}

#[derive(Clone)]
pub struct CursorCodec {
    mac: HmacSha256,
}

impl std::fmt::Debug for CursorCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorCodec").finish_non_exhaustive()
    }
}

impl CursorCodec {
    pub fn new(secret: &[u8]) -> AppResult<Self> {
        if secret.is_empty() {
            return Err(AppError::Config("cursor secret must not be empty".into()));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| AppError::Config(format!("cursor secret: {e}")))?;
        Ok(Self { mac })
    }

    /// Codec with a per-process key; tokens do not survive a restart
    pub fn random() -> AppResult<Self> {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(&key)
    }

    pub fn encode(&self, position: &CursorPosition) -> String {
        let payload = match position {
            CursorPosition::Message(c) => Payload {
                v: CURSOR_VERSION,
                k: Kind::Message,
                d: Some(c.direction),
                t: c.position.created_at.timestamp_micros(),
                id: c.position.id,
            },
            CursorPosition::Conversation(c) => Payload {
                v: CURSOR_VERSION,
                k: Kind::Conversation,
                d: None,
                t: c.position.sort_at.timestamp_micros(),
                id: c.position.id,
            },
        };

        // serializing a struct of plain fields cannot fail
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        let body = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac.clone();
        mac.update(body.as_bytes());
        let tag = mac.finalize().into_bytes();

        format!("{body}.{}", URL_SAFE_NO_PAD.encode(&tag[..TAG_LEN]))
    }

    pub fn decode(&self, token: &str) -> AppResult<CursorPosition> {
        let (body, tag) = token.split_once('.').ok_or_else(invalid)?;
        let tag = URL_SAFE_NO_PAD.decode(tag).map_err(|_| invalid())?;
        if tag.len() != TAG_LEN {
            return Err(invalid());
        }

        let mut mac = self.mac.clone();
        mac.update(body.as_bytes());
        mac.verify_truncated_left(&tag).map_err(|_| invalid())?;

        let json = URL_SAFE_NO_PAD.decode(body).map_err(|_| invalid())?;
        let payload: Payload = serde_json::from_slice(&json).map_err(|_| invalid())?;
        if payload.v != CURSOR_VERSION {
            return Err(AppError::Validation("unsupported cursor version".into()));
        }

        let at = DateTime::from_timestamp_micros(payload.t).ok_or_else(invalid)?;
        match (payload.k, payload.d) {
            (Kind::Message, Some(direction)) => Ok(CursorPosition::Message(MessageCursor {
                direction,
                position: MessagePosition {
                    created_at: at,
                    id: payload.id,
                },
            })),
            (Kind::Conversation, None) => Ok(CursorPosition::Conversation(ConversationCursor {
                position: ConversationPosition {
                    sort_at: at,
                    id: payload.id,
                },
            })),
            _ => Err(invalid()),
        }
    }

    pub fn decode_message(&self, token: &str) -> AppResult<MessageCursor> {
        match self.decode(token)? {
            CursorPosition::Message(c) => Ok(c),
            CursorPosition::Conversation(_) => {
                Err(AppError::Validation("cursor does not belong to a message list".into()))
            }
        }
    }

    pub fn decode_conversation(&self, token: &str) -> AppResult<ConversationCursor> {
        match self.decode(token)? {
            CursorPosition::Conversation(c) => Ok(c),
            CursorPosition::Message(_) => Err(AppError::Validation(
                "cursor does not belong to a conversation list".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::now_micros;

    fn message_cursor(direction: Direction) -> CursorPosition {
        CursorPosition::Message(MessageCursor {
            direction,
            position: MessagePosition {
                created_at: now_micros(),
                id: Uuid::now_v7(),
            },
        })
    }

    #[test]
    fn round_trips_both_kinds() {
        let codec = CursorCodec::new(b"secret").unwrap();

        let m = message_cursor(Direction::After);
        assert_eq!(codec.decode(&codec.encode(&m)).unwrap(), m);

        let c = CursorPosition::Conversation(ConversationCursor {
            position: ConversationPosition {
                sort_at: now_micros(),
                id: Uuid::new_v4(),
            },
        });
        assert_eq!(codec.decode(&codec.encode(&c)).unwrap(), c);
    }

    #[test]
    fn rejects_tampered_payload() {
        let codec = CursorCodec::new(b"secret").unwrap();
        let token = codec.encode(&message_cursor(Direction::Before));
        let (_, tag) = token.split_once('.').unwrap();

        let forged_body = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&Payload {
                v: CURSOR_VERSION,
                k: Kind::Message,
                d: Some(Direction::Before),
                t: 0,
                id: Uuid::nil(),
            })
            .unwrap(),
        );
        let err = codec.decode(&format!("{forged_body}.{tag}")).unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn rejects_other_keys_and_garbage() {
        let a = CursorCodec::new(b"a").unwrap();
        let b = CursorCodec::new(b"b").unwrap();
        let token = a.encode(&message_cursor(Direction::Before));

        assert!(b.decode(&token).is_err());
        assert!(a.decode("not-a-cursor").is_err());
        assert!(a.decode("").is_err());
        assert!(a.decode("abc.def").is_err());
    }

    #[test]
    fn rejects_wrong_kind() {
        let codec = CursorCodec::random().unwrap();
        let token = codec.encode(&message_cursor(Direction::After));
        assert!(codec.decode_message(&token).is_ok());
        assert!(codec.decode_conversation(&token).is_err());
    }

    #[test]
    fn clamps_limits() {
        assert_eq!(clamp_limit(None, MAX_MESSAGE_PAGE), 50);
        assert_eq!(clamp_limit(Some(0), MAX_MESSAGE_PAGE), 1);
        assert_eq!(clamp_limit(Some(-3), MAX_MESSAGE_PAGE), 1);
        assert_eq!(clamp_limit(Some(500), MAX_CONVERSATION_PAGE), 20);
        assert_eq!(clamp_limit(Some(7), MAX_CONVERSATION_PAGE), 7);
    }

    #[test]
    fn empty_secret_is_a_config_error() {
        assert!(matches!(CursorCodec::new(b""), Err(AppError::Config(_))));
    }
}
