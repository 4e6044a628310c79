use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use crate::store::{limit_key, ExpiringStore};

#[derive(Debug, Clone)]
pub struct UserLimitConfig {
    pub threshold: i64,
    pub window: Duration,
}

impl Default for UserLimitConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCheck {
    pub count: i64,
    pub limited: bool,
}

/// Caps attempts per user inside a fixed window. The window starts with the
/// user's first attempt and is never extended by later ones.
pub struct UserRateLimiter {
    store: Arc<dyn ExpiringStore>,
    config: UserLimitConfig,
}

impl UserRateLimiter {
    pub fn new(store: Arc<dyn ExpiringStore>, config: UserLimitConfig) -> Self {
        Self { store, config }
    }

    /// Counts this attempt and returns the running total, `None` if the
    /// counter could not be written.
    pub async fn record(&self, user_id: i32) -> Option<i64> {
        match self.store.increment_in_window(&limit_key(user_id), self.config.window).await {
            Ok(count) => {
                debug!(user_id, count, "recorded user attempt");
                Some(count)
            }
            Err(e) => {
                warn!(user_id, error = %e, "failed to record user attempt");
                None
            }
        }
    }

    /// Limited once the counter is past the threshold, or whenever it cannot
    /// be read.
    pub async fn is_limited(&self, user_id: i32) -> bool {
        let raw = match self.store.get(&limit_key(user_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                error!(user_id, "no attempt counter for user, suspected forged request");
                return true;
            }
            Err(e) => {
                warn!(user_id, error = %e, "failed to read user attempt counter");
                return true;
            }
        };

        match raw.parse::<i64>() {
            Ok(count) => count > self.config.threshold,
            Err(e) => {
                error!(user_id, value = %raw, error = %e, "corrupt attempt counter");
                true
            }
        }
    }

    pub async fn record_and_check(&self, user_id: i32) -> RateCheck {
        let count = self.record(user_id).await;
        let limited = self.is_limited(user_id).await;
        RateCheck {
            count: count.unwrap_or(-1),
            limited: limited || count.is_none(),
        }
    }
}
