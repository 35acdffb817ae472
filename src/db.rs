use crate::error::AppError;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::NoTls;

const SCHEMA: &str = include_str!("../migrations/0001_chat_schema.sql");
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn init_pool(database_url: &str, max_connections: usize) -> Result<Pool, AppError> {
    let pg_config: tokio_postgres::Config = database_url
        .parse()
        .map_err(|e| AppError::Config(format!("DATABASE_URL: {e}")))?;

    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(manager)
        .max_size(max_connections)
        .runtime(Runtime::Tokio1)
        .wait_timeout(Some(CONNECT_TIMEOUT))
        .create_timeout(Some(CONNECT_TIMEOUT))
        .build()
        .map_err(|e| AppError::Config(format!("db pool: {e}")))?;

    // fail fast instead of on the first request
    let client = pool
        .get()
        .await
        .map_err(|e| AppError::StartServer(format!("db connect: {e}")))?;
    client
        .execute("SELECT 1", &[])
        .await
        .map_err(|e| AppError::StartServer(format!("db health check: {e}")))?;

    tracing::info!(max_connections, "database pool ready");
    Ok(pool)
}

/// Apply the schema; every statement is idempotent
pub async fn run_migrations(pool: &Pool) -> Result<(), AppError> {
    let client = pool
        .get()
        .await
        .map_err(|e| AppError::StartServer(format!("db connect: {e}")))?;
    client
        .batch_execute(SCHEMA)
        .await
        .map_err(|e| AppError::StartServer(format!("migrations: {e}")))?;
    tracing::info!("database schema up to date");
    Ok(())
}
