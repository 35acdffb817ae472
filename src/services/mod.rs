pub mod conversation_service;
pub mod cursor;
pub mod idempotency;
pub mod message_service;
pub mod ordering;
pub mod rate_limiter;
pub mod read_state;
pub mod safety;

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at the storage precision (microseconds), so cursors round-trip exactly
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
