use crate::{
    config::Config,
    error::AppResult,
    services::{
        conversation_service::{ConversationService, MatchPolicy},
        cursor::CursorCodec,
        idempotency::IdempotencyGuard,
        message_service::MessageService,
        ordering::ConversationLocks,
        rate_limiter::RateLimiter,
        read_state::ReadStateTracker,
        safety::SafetyLedger,
    },
    store::ChatStore,
    websocket::ConnectionRegistry,
};
use actix_middleware::IdentityVerifier;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ChatStore>,
    pub registry: ConnectionRegistry,
    /// Identity collaborator, shared with the auth middleware and the channel handshake
    pub identity: Arc<dyn IdentityVerifier>,
    pub limiter: Arc<RateLimiter>,
    pub locks: ConversationLocks,
    pub cursors: Arc<CursorCodec>,
    pub conversations: ConversationService,
    pub messages: MessageService,
    pub read_states: ReadStateTracker,
    pub safety: SafetyLedger,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn ChatStore>,
        identity: Arc<dyn IdentityVerifier>,
        matches: Arc<dyn MatchPolicy>,
    ) -> AppResult<Self> {
        let cursors = Arc::new(match config.cursor_secret.as_deref() {
            Some(secret) => CursorCodec::new(secret.as_bytes())?,
            None => {
                tracing::warn!("CURSOR_SECRET not set; pagination cursors will not survive a restart");
                CursorCodec::random()?
            }
        });

        let registry = ConnectionRegistry::new(config.channel.outbound_buffer);
        let limiter = Arc::new(RateLimiter::new(config.rate_limits));
        let locks = ConversationLocks::new();
        let guard = IdempotencyGuard::new(store.clone(), config.idempotency_window);

        let conversations = ConversationService::new(store.clone(), cursors.clone(), matches);
        let messages = MessageService::new(
            store.clone(),
            guard,
            limiter.clone(),
            locks.clone(),
            registry.clone(),
            cursors.clone(),
            config.max_text_chars,
        );
        let read_states = ReadStateTracker::new(store.clone(), locks.clone(), registry.clone());
        let safety = SafetyLedger::new(store.clone(), limiter.clone(), locks.clone(), registry.clone());

        Ok(Self {
            config: Arc::new(config),
            store,
            registry,
            identity,
            limiter,
            locks,
            cursors,
            conversations,
            messages,
            read_states,
            safety,
        })
    }
}
