//! Fixed-window rate limiter keyed by (user, action)

use std::fmt;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use chat_common::RateLimitConfig;
use chat_core::{DomainError, Snowflake};

/// Kinds of client actions that are throttled independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Message,
    Typing,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Typing => "typing",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage inside the current window
#[derive(Debug, Clone, Copy)]
struct Quota {
    count: u32,
    window_start: Instant,
}

pub struct RateLimiter {
    window: Duration,
    max_messages: u32,
    max_typing: u32,
    quotas: DashMap<(Snowflake, ActionKind), Quota>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: config.window(),
            max_messages: config.max_messages,
            max_typing: config.max_typing,
            quotas: DashMap::new(),
        }
    }

    fn limit(&self, kind: ActionKind) -> u32 {
        match kind {
            ActionKind::Message => self.max_messages,
            ActionKind::Typing => self.max_typing,
        }
    }

    /// Count one action; returns false once the window's budget is spent
    pub fn allow(&self, user_id: Snowflake, kind: ActionKind) -> bool {
        self.acquire(user_id, kind).is_ok()
    }

    /// Like [`allow`](Self::allow) but reports how long until the window resets
    pub fn check(&self, user_id: Snowflake, kind: ActionKind) -> Result<(), DomainError> {
        self.acquire(user_id, kind)
            .map_err(|retry_after| DomainError::RateLimitExceeded {
                action: kind.as_str(),
                retry_after_ms: retry_after.as_millis() as u64,
            })
    }

    fn acquire(&self, user_id: Snowflake, kind: ActionKind) -> Result<(), Duration> {
        let now = Instant::now();
        let limit = self.limit(kind);
        let mut quota = self.quotas.entry((user_id, kind)).or_insert(Quota {
            count: 0,
            window_start: now,
        });

        if now.duration_since(quota.window_start) >= self.window {
            quota.count = 0;
            quota.window_start = now;
        }

        if quota.count >= limit {
            let reset_at = quota.window_start + self.window;
            tracing::debug!(
                user_id = %user_id,
                action = %kind,
                count = quota.count,
                "Rate limit exceeded"
            );
            return Err(reset_at.saturating_duration_since(now));
        }

        quota.count += 1;
        Ok(())
    }

    /// Drop windows that have fully elapsed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.quotas.len();
        self.quotas
            .retain(|_, quota| now.duration_since(quota.window_start) < self.window);
        before - self.quotas.len()
    }

    pub fn tracked(&self) -> usize {
        self.quotas.len()
    }
}
