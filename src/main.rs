use actix_web::{web, HttpServer};
use chat_service::{
    config::{Config, StoreBackend},
    db, error::AppError, logging, routes,
    services::conversation_service::AllowAllMatches,
    state::AppState,
    store::{ChatStore, MemoryChatStore, PgChatStore},
};
use std::sync::Arc;
use std::time::Duration;

const KEY_PURGE_INTERVAL: Duration = Duration::from_secs(3600);
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = Config::from_env()?;
    tracing::info!(config = ?cfg, "configuration loaded");

    let store: Arc<dyn ChatStore> = match cfg.store {
        StoreBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .ok_or_else(|| AppError::Config("DATABASE_URL missing".into()))?;
            let pool = db::init_pool(url, cfg.db_max_connections).await?;
            db::run_migrations(&pool).await?;
            Arc::new(PgChatStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store; data is lost on restart");
            Arc::new(MemoryChatStore::new())
        }
    };

    let identity = Arc::new(cfg.identity_verifier()?);
    let port = cfg.port;
    let state = AppState::new(cfg, store, identity, Arc::new(AllowAllMatches))?;

    spawn_maintenance(state.clone());

    let bind_addr = format!("0.0.0.0:{port}");
    tracing::info!(%bind_addr, "starting chat-service");

    let data = web::Data::new(state);
    HttpServer::new(move || routes::build_app(data.clone()))
        .bind(&bind_addr)
        .map_err(|e| AppError::StartServer(format!("bind: {e}")))?
        .run()
        .await
        .map_err(|e| AppError::StartServer(format!("server: {e}")))
}

/// Expired idempotency keys, idle rate-limit logs and unused conversation locks
fn spawn_maintenance(state: AppState) {
    let store = state.store.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(KEY_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match store.purge_expired_idempotency_keys(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "expired idempotency keys purged"),
                Err(e) => tracing::warn!(error = %e, "idempotency key purge failed"),
            }
        }
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        loop {
            ticker.tick().await;
            let buckets = state.limiter.purge_idle();
            let locks = state.locks.prune();
            tracing::debug!(buckets, locks, "housekeeping pass");
        }
    });
}
