//! Fixed-window request rate limiting on top of [`Cache`].
//!
//! Each identity gets a counter `"<prefix><identity>"` that lives for one
//! window. The first request opens the window with a set-if-absent carrying
//! the window TTL; later requests use the tier's atomic increment, so
//! concurrent requests never lose a count.

use std::time::Duration;

use crate::cache::Cache;
use crate::config::RateLimitConfig;
use crate::deferred::Deferred;
use crate::error::CacheResult;
use crate::metrics;
use crate::store::TimeToLive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u64,
    pub window: Duration,
    pub prefix: String,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            limit: config.limit,
            window: Duration::from_secs(config.window_secs),
            prefix: config.prefix.clone(),
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests counted in the current window, this one included when admitted.
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
    /// Time until the window resets.
    pub reset_after: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    cache: Cache,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(cache: Cache, policy: RateLimitPolicy) -> Self {
        Self { cache, policy }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    fn counter_key(&self, identity: &str) -> String {
        format!("{}{identity}", self.policy.prefix)
    }

    /// Count a request from `identity` and decide whether to admit it.
    pub fn check(&self, identity: &str) -> Deferred<RateLimitDecision> {
        let limiter = self.clone();
        let key = self.counter_key(identity);
        Deferred::spawn(async move { limiter.admit(key).await })
    }

    async fn admit(&self, key: String) -> CacheResult<RateLimitDecision> {
        let limit = self.policy.limit;
        let ceiling = i64::try_from(limit).unwrap_or(i64::MAX);
        let window = Some(self.policy.window);

        let count = match self.cache.counter(key.clone()).await? {
            Some(current) if current >= ceiling => {
                return self.reject(&key, current as u64).await;
            }
            Some(_) => self.cache.increment(key.clone(), 1).await?,
            None => {
                if self.cache.open_counter(key.clone(), 1, window).await? {
                    1
                } else {
                    // Another request opened the window first.
                    self.cache.increment(key.clone(), 1).await?
                }
            }
        };

        if count == 1 {
            // Covers a window that expired between the read and the increment:
            // the increment recreated the counter without a TTL.
            if self.cache.ttl(key.clone()).await? == TimeToLive::Persistent {
                self.cache.expire(key.clone(), window).await?;
            }
        }

        let count = count.max(0) as u64;
        if count > limit {
            return self.reject(&key, count).await;
        }
        Ok(RateLimitDecision {
            allowed: true,
            count,
            limit,
            remaining: limit - count,
            reset_after: self.reset_after(&key).await?,
        })
    }

    async fn reject(&self, key: &str, count: u64) -> CacheResult<RateLimitDecision> {
        metrics::record_rate_limit_rejection();
        let reset_after = self.reset_after(key).await?;
        tracing::debug!(key, count, limit = self.policy.limit, ?reset_after, "rate limit exceeded");
        Ok(RateLimitDecision {
            allowed: false,
            count,
            limit: self.policy.limit,
            remaining: 0,
            reset_after,
        })
    }

    async fn reset_after(&self, key: &str) -> CacheResult<Duration> {
        Ok(self
            .cache
            .ttl(key)
            .await?
            .remaining()
            .unwrap_or(self.policy.window))
    }
}
