//! Rate Limiter
//!
//! Fixed-window attempt counter with lockout, keyed by an identity+action
//! composite (e.g. "transfer:<account>", "signin:<email>:<ip>"). Counters
//! live in the shared TTL store; keys are independent, so no cross-key
//! locking is needed.
//!
//! Failures accumulate toward lockout and are never reset by another
//! failure; only success (or an explicit admin reset) clears the counter.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::Clock;
use crate::store::{StoreError, TtlStore};

/// Where a key stands relative to its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitStatus {
    /// Under the limit
    Ok,

    /// Approaching the limit (informational only)
    Warn,

    /// Locked out until the embedded instant
    Locked { until: DateTime<Utc> },
}

/// Persisted counter state for one key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Counter {
    count: u32,
    window_start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lockout_until: Option<DateTime<Utc>>,
}

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Per-key attempt counter with lockout.
pub struct RateLimiter {
    store: Arc<dyn TtlStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
    lockout: Duration,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn TtlStore>,
        clock: Arc<dyn Clock>,
        window: Duration,
        lockout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            window,
            lockout,
        }
    }

    fn storage_key(key: &str) -> String {
        format!("ratelimit:{key}")
    }

    fn entry_ttl(&self) -> Option<std::time::Duration> {
        // Counters must outlive both the window and any lockout they carry.
        (self.window + self.lockout).to_std().ok()
    }

    fn parse(&self, raw: Option<&str>) -> Option<Counter> {
        let raw = raw?;
        match serde_json::from_str(raw) {
            Ok(counter) => Some(counter),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable rate-limit counter");
                None
            }
        }
    }

    fn window_expired(&self, counter: &Counter, now: DateTime<Utc>) -> bool {
        counter.window_start + self.window <= now
    }

    /// Whether an attempt under this key is currently allowed.
    pub async fn check_limit(&self, key: &str, max_attempts: u32) -> Result<bool, RateLimitError> {
        Ok(matches!(
            self.status(key, max_attempts).await?,
            RateLimitStatus::Ok | RateLimitStatus::Warn
        ))
    }

    /// Record a failed attempt. Returns the key's status after the
    /// increment; entering `Locked` sets the lockout deadline.
    pub async fn increment(
        &self,
        key: &str,
        max_attempts: u32,
    ) -> Result<RateLimitStatus, RateLimitError> {
        let now = self.clock.now();
        let window = self.window;
        let lockout = self.lockout;

        // The closure runs under the store's key lock, so the
        // read-modify-write is atomic per key.
        let updated = self
            .store
            .fetch_update(
                &Self::storage_key(key),
                self.entry_ttl(),
                Box::new(move |current| {
                    let current: Option<Counter> =
                        current.and_then(|raw| serde_json::from_str(raw).ok());

                    // A counter restarts once its window or an elapsed
                    // lockout is behind us.
                    let mut counter = match current {
                        Some(c)
                            if c.window_start + window > now
                                && c.lockout_until.map(|u| u > now).unwrap_or(true) =>
                        {
                            c
                        }
                        _ => Counter {
                            count: 0,
                            window_start: now,
                            lockout_until: None,
                        },
                    };

                    counter.count = counter.count.saturating_add(1);
                    if counter.count >= max_attempts && counter.lockout_until.is_none() {
                        counter.lockout_until = Some(now + lockout);
                    }

                    serde_json::to_string(&counter).ok()
                }),
            )
            .await?;

        let counter: Counter = updated
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(Counter {
                count: 1,
                window_start: now,
                lockout_until: None,
            });

        let status = self.classify(&counter, max_attempts, now);
        if let RateLimitStatus::Locked { until } = status {
            tracing::warn!(key, count = counter.count, lockout_until = %until, "Rate limit lockout");
        }
        Ok(status)
    }

    /// Clear the counter after a successful operation.
    pub async fn reset_limit(&self, key: &str) -> Result<(), RateLimitError> {
        self.store.remove(&Self::storage_key(key)).await?;
        Ok(())
    }

    /// The lockout deadline, if the key is currently locked.
    pub async fn lockout_time(&self, key: &str) -> Result<Option<DateTime<Utc>>, RateLimitError> {
        let now = self.clock.now();
        let raw = self.store.get(&Self::storage_key(key)).await?;
        Ok(self
            .parse(raw.as_deref())
            .and_then(|c| c.lockout_until)
            .filter(|until| *until > now))
    }

    /// Full status for a key.
    pub async fn status(
        &self,
        key: &str,
        max_attempts: u32,
    ) -> Result<RateLimitStatus, RateLimitError> {
        let now = self.clock.now();
        let raw = self.store.get(&Self::storage_key(key)).await?;
        let counter = match self.parse(raw.as_deref()) {
            Some(counter) => counter,
            None => return Ok(RateLimitStatus::Ok),
        };
        Ok(self.classify(&counter, max_attempts, now))
    }

    fn classify(
        &self,
        counter: &Counter,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> RateLimitStatus {
        // Lockout outlives the counting window.
        if let Some(until) = counter.lockout_until {
            if until > now {
                return RateLimitStatus::Locked { until };
            }
        }

        if self.window_expired(counter, now) || counter.count < warn_threshold(max_attempts) {
            return RateLimitStatus::Ok;
        }

        if counter.count >= max_attempts {
            // Count is at the limit but the lockout elapsed; window restart
            // happens on the next increment.
            return RateLimitStatus::Ok;
        }

        RateLimitStatus::Warn
    }
}

/// Warn once a key reaches 80% of its allowance.
fn warn_threshold(max_attempts: u32) -> u32 {
    ((max_attempts as u64 * 4).div_ceil(5)) as u32
}
