// SPDX-License-Identifier: MIT OR Apache-2.0
//! Token-bucket rate limiting for provider calls.
//!
//! Each bucket refills continuously at `refill_per_sec` tokens per second
//! up to `capacity`, and [`TokenBucket::acquire`] sleeps until at least
//! one token is available before returning.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Configuration for a single rate limit.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RateLimitConfig {
    /// Maximum number of tokens the bucket can hold.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl RateLimitConfig {
    /// A rate limit expressed as requests per minute.
    #[must_use]
    pub fn per_minute(requests_per_minute: f64) -> Self {
        Self {
            capacity: requests_per_minute.max(1.0),
            refill_per_sec: requests_per_minute / 60.0,
        }
    }
}

struct Inner {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket shared across concurrent callers via interior mutability.
pub struct TokenBucket {
    config: RateLimitConfig,
    inner: Mutex<Inner>,
}

impl TokenBucket {
    /// Construct a bucket starting full.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                tokens: config.capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, inner: &mut Inner) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        inner.tokens = (inner.tokens + elapsed * self.config.refill_per_sec).min(self.config.capacity);
        inner.last_refill = now;
    }

    /// Try to take one token immediately without waiting.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().expect("token bucket mutex poisoned");
        self.refill(&mut inner);
        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Block (async) until a token is available, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut inner = self.inner.lock().expect("token bucket mutex poisoned");
                self.refill(&mut inner);
                if inner.tokens >= 1.0 {
                    inner.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - inner.tokens;
                    let secs = deficit / self.config.refill_per_sec.max(f64::EPSILON);
                    Some(Duration::from_secs_f64(secs.max(0.0)))
                }
            };
            match wait {
                None => return,
                Some(d) => sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_drains_capacity() {
        let bucket = TokenBucket::new(RateLimitConfig { capacity: 2.0, refill_per_sec: 0.0 });
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let bucket = TokenBucket::new(RateLimitConfig { capacity: 1.0, refill_per_sec: 1000.0 });
        assert!(bucket.try_acquire());
        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn per_minute_constructor_divides_evenly() {
        let cfg = RateLimitConfig::per_minute(60.0);
        assert!((cfg.refill_per_sec - 1.0).abs() < 1e-9);
    }
}
