//! Shared harness: the full application over the in-memory store with HS256 credentials
#![allow(dead_code)]

use actix_web::body::MessageBody;
use actix_web::dev::ServiceResponse;
use actix_web::{test, web};
use chat_service::config::Config;
use chat_service::models::{ContentType, Message};
use chat_service::services::message_service::SendMessage;
use chat_service::services::conversation_service::AllowAllMatches;
use chat_service::services::rate_limiter::{Bucket, RateLimit};
use chat_service::state::AppState;
use chat_service::store::MemoryChatStore;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-test-secret";

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: u64,
}

pub fn token_for(user_id: Uuid) -> String {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;
    encode(
        &Header::default(),
        &Claims {
            sub: user_id.to_string(),
            exp,
        },
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn bearer(user_id: Uuid) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token_for(user_id)))
}

/// Limits high enough that only tests that lower them ever see a 429
pub fn test_config() -> Config {
    let mut config = Config {
        identity_key: chat_service::config::IdentityKey::Hs256Secret(JWT_SECRET.into()),
        cursor_secret: Some("integration-cursor-secret".into()),
        ..Config::default()
    };
    for bucket in Bucket::ALL {
        config.rate_limits.set(bucket, RateLimit::new(10_000, 1));
    }
    config
}

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryChatStore>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryChatStore::new());
        let identity = Arc::new(config.identity_verifier().unwrap());
        let state = AppState::new(config, store.clone(), identity, Arc::new(AllowAllMatches)).unwrap();
        Self { state, store }
    }

    pub fn data(&self) -> web::Data<AppState> {
        web::Data::new(self.state.clone())
    }

    pub async fn open(&self, a: Uuid, b: Uuid) -> Uuid {
        self.state.conversations.open(a, b).await.unwrap().0.id
    }

    pub async fn send(&self, conversation_id: Uuid, sender_id: Uuid, content: &str) -> Message {
        self.state
            .messages
            .send(SendMessage {
                conversation_id,
                sender_id,
                content: content.into(),
                content_type: ContentType::Text,
                idempotency_key: Some(idempotency_key()),
            })
            .await
            .unwrap()
            .message
    }
}

pub fn idempotency_key() -> String {
    Uuid::new_v4().to_string()
}

pub async fn json_body<B: MessageBody>(resp: ServiceResponse<B>) -> Value {
    let body = test::read_body(resp).await;
    serde_json::from_slice(&body).unwrap()
}

pub fn header<B>(resp: &ServiceResponse<B>, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
