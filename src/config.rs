use actix_middleware::JwtIdentityVerifier;
use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::services::rate_limiter::{Bucket, RateLimit, RateLimitConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local store for development and tests
    Memory,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(AppError::Config(format!(
                "CHAT_STORE must be postgres or memory, got {other}"
            ))),
        }
    }
}

/// Key material for verifying caller credentials
#[derive(Clone)]
pub enum IdentityKey {
    Hs256Secret(String),
    Rs256PublicPem(String),
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Hs256Secret(_) => f.write_str("Hs256Secret(<redacted>)"),
            IdentityKey::Rs256PublicPem(_) => f.write_str("Rs256PublicPem(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub handshake_timeout: Duration,
    pub outbound_buffer: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            outbound_buffer: 256,
            heartbeat_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: usize,
    pub identity_key: IdentityKey,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    /// Random per-process key when unset
    pub cursor_secret: Option<String>,
    pub idempotency_window: chrono::Duration,
    pub max_text_chars: usize,
    pub channel: ChannelConfig,
    pub rate_limits: RateLimitConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("store", &self.store)
            .field("db_max_connections", &self.db_max_connections)
            .field("identity_key", &self.identity_key)
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("idempotency_window", &self.idempotency_window)
            .field("max_text_chars", &self.max_text_chars)
            .field("channel", &self.channel)
            .field("rate_limits", &self.rate_limits)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            store: StoreBackend::Memory,
            database_url: None,
            db_max_connections: 16,
            identity_key: IdentityKey::Hs256Secret("dev-secret".into()),
            jwt_issuer: None,
            jwt_audience: None,
            cursor_secret: None,
            idempotency_window: chrono::Duration::hours(24),
            max_text_chars: 4000,
            channel: ChannelConfig::default(),
            rate_limits: RateLimitConfig::default(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let defaults = Config::default();

        let store = match env_opt("CHAT_STORE") {
            Some(raw) => raw.parse()?,
            None => StoreBackend::Postgres,
        };
        let database_url = env_opt("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config("DATABASE_URL missing".into()));
        }

        let identity_key = match (env_opt("JWT_SECRET"), env_opt("JWT_PUBLIC_KEY_PEM")) {
            (_, Some(pem)) => IdentityKey::Rs256PublicPem(pem.replace("\\n", "\n")),
            (Some(secret), None) => IdentityKey::Hs256Secret(secret),
            (None, None) => {
                return Err(AppError::Config(
                    "one of JWT_SECRET or JWT_PUBLIC_KEY_PEM is required".into(),
                ))
            }
        };

        let idempotency_hours: i64 = env_or("IDEMPOTENCY_WINDOW_HOURS", 24)?;
        if idempotency_hours <= 0 {
            return Err(AppError::Config(
                "IDEMPOTENCY_WINDOW_HOURS must be positive".into(),
            ));
        }

        let channel = ChannelConfig {
            handshake_timeout: Duration::from_secs(env_or("WS_HANDSHAKE_TIMEOUT_SECS", 10)?),
            outbound_buffer: env_or("WS_OUTBOUND_BUFFER", defaults.channel.outbound_buffer)?,
            heartbeat_interval: Duration::from_secs(env_or("WS_HEARTBEAT_INTERVAL_SECS", 5)?),
            client_timeout: Duration::from_secs(env_or("WS_CLIENT_TIMEOUT_SECS", 30)?),
        };

        let mut rate_limits = RateLimitConfig::default();
        for bucket in Bucket::ALL {
            let var = bucket.env_var();
            if let Some(raw) = env_opt(&var) {
                let limit = RateLimit::parse(&raw).map_err(|e| AppError::Config(format!("{var}: {e}")))?;
                rate_limits.set(bucket, limit);
            }
        }

        Ok(Self {
            port: env_or("PORT", defaults.port)?,
            store,
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            identity_key,
            jwt_issuer: env_opt("JWT_ISSUER"),
            jwt_audience: env_opt("JWT_AUDIENCE"),
            cursor_secret: env_opt("CURSOR_SECRET"),
            idempotency_window: chrono::Duration::hours(idempotency_hours),
            max_text_chars: env_or("MAX_TEXT_CHARS", defaults.max_text_chars)?,
            channel,
            rate_limits,
        })
    }

    /// JWT verifier for the configured key, issuer and audience
    pub fn identity_verifier(&self) -> Result<JwtIdentityVerifier, AppError> {
        let mut verifier = match &self.identity_key {
            IdentityKey::Hs256Secret(secret) => JwtIdentityVerifier::hs256(secret.as_bytes()),
            IdentityKey::Rs256PublicPem(pem) => JwtIdentityVerifier::rs256_pem(pem.as_bytes())
                .map_err(|e| AppError::Config(e.to_string()))?,
        };
        if let Some(issuer) = &self.jwt_issuer {
            verifier = verifier.with_issuer(issuer);
        }
        if let Some(audience) = &self.jwt_audience {
            verifier = verifier.with_audience(audience);
        }
        Ok(verifier)
    }
}
