//! Two-party chat service
//!
//! REST endpoints and a live WebSocket channel over one [`store::ChatStore`]. Writes are
//! idempotent per `(conversation, sender, key)`, ordered per conversation, and fanned out
//! to connected participants after they commit.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod websocket;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use state::AppState;
