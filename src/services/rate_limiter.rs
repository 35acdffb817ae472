//! Per-user sliding-window log limiter

use dashmap::DashMap;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    MessageSend,
    Report,
    Block,
    ChannelInbound,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::MessageSend,
        Bucket::Report,
        Bucket::Block,
        Bucket::ChannelInbound,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::MessageSend => "message_send",
            Bucket::Report => "report",
            Bucket::Block => "block",
            Bucket::ChannelInbound => "channel_inbound",
        }
    }

    /// Environment variable overriding the bucket's limit
    pub fn env_var(&self) -> String {
        format!("RATE_LIMIT_{}", self.as_str().to_ascii_uppercase())
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Parse `<count>/<seconds>`, e.g. `10/1`
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (count, secs) = raw
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("expected <count>/<seconds>, got {raw:?}"))?;

        let count: u32 = count
            .trim()
            .parse()
            .map_err(|_| format!("invalid count in {raw:?}"))?;
        let secs: u64 = secs
            .trim()
            .parse()
            .map_err(|_| format!("invalid seconds in {raw:?}"))?;

        if count == 0 || secs == 0 {
            return Err(format!("count and seconds must be positive in {raw:?}"));
        }
        Ok(Self::new(count, secs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub message_send: RateLimit,
    pub report: RateLimit,
    pub block: RateLimit,
    pub channel_inbound: RateLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        const DAY: u64 = 24 * 60 * 60;
        Self {
            message_send: RateLimit::new(10, 1),
            report: RateLimit::new(5, DAY),
            block: RateLimit::new(10, DAY),
            channel_inbound: RateLimit::new(50, 1),
        }
    }
}

impl RateLimitConfig {
    pub fn limit(&self, bucket: Bucket) -> RateLimit {
        match bucket {
            Bucket::MessageSend => self.message_send,
            Bucket::Report => self.report,
            Bucket::Block => self.block,
            Bucket::ChannelInbound => self.channel_inbound,
        }
    }

    pub fn set(&mut self, bucket: Bucket, limit: RateLimit) {
        match bucket {
            Bucket::MessageSend => self.message_send = limit,
            Bucket::Report => self.report = limit,
            Bucket::Block => self.block = limit,
            Bucket::ChannelInbound => self.channel_inbound = limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    Deny { retry_after: Duration },
}

pub struct RateLimiter {
    config: RateLimitConfig,
    logs: DashMap<(Uuid, Bucket), VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            logs: DashMap::new(),
        }
    }

    pub fn check(&self, user_id: Uuid, bucket: Bucket) -> RateDecision {
        self.check_at(user_id, bucket, Instant::now())
    }

    /// Record an attempt at `now`; denied attempts are not recorded
    pub fn check_at(&self, user_id: Uuid, bucket: Bucket, now: Instant) -> RateDecision {
        let limit = self.config.limit(bucket);
        let mut log = self.logs.entry((user_id, bucket)).or_default();

        while let Some(&oldest) = log.front() {
            if now.saturating_duration_since(oldest) >= limit.window {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() < limit.max_requests as usize {
            log.push_back(now);
            return RateDecision::Allow;
        }

        let retry_after = log
            .front()
            .map(|&oldest| limit.window.saturating_sub(now.saturating_duration_since(oldest)))
            .unwrap_or(limit.window);
        RateDecision::Deny { retry_after }
    }

    /// `check` mapped onto the error taxonomy
    pub fn enforce(&self, user_id: Uuid, bucket: Bucket) -> AppResult<()> {
        match self.check(user_id, bucket) {
            RateDecision::Allow => Ok(()),
            RateDecision::Deny { retry_after } => {
                metrics::record_rate_limited(bucket.as_str());
                tracing::debug!(user_id = %user_id, bucket = %bucket, "rate limited");
                Err(AppError::RateLimited {
                    bucket: bucket.as_str(),
                    retry_after_secs: retry_after_secs(retry_after),
                })
            }
        }
    }

    /// Drop logs whose newest entry fell out of its window
    pub fn purge_idle(&self) -> usize {
        self.purge_idle_at(Instant::now())
    }

    pub fn purge_idle_at(&self, now: Instant) -> usize {
        let before = self.logs.len();
        self.logs.retain(|(_, bucket), log| {
            let window = self.config.limit(*bucket).window;
            log.back()
                .is_some_and(|&newest| now.saturating_duration_since(newest) < window)
        });
        before.saturating_sub(self.logs.len())
    }
}

fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}
