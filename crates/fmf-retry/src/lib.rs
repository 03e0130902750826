// SPDX-License-Identifier: MIT OR Apache-2.0
//! Decorrelated-jitter retry for connector and provider calls.
//!
//! The backoff follows the "full jitter" variant used by AWS SDKs:
//! `delay = min(max_delay, uniform(base_delay, max(base_delay, prev_delay * 3)))`.
//! A call stops retrying once either the attempt count or the total
//! elapsed wall-clock time exceeds its configured bound, whichever comes
//! first.

use fmf_error::FmfError;
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tunables for a single retry policy.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Floor for the jittered delay.
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    /// Ceiling for the jittered delay.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Maximum total elapsed wall-clock time across all attempts.
    #[serde(with = "duration_millis")]
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(20),
            max_elapsed: Duration::from_secs(60),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Record of a single failed attempt.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// 1-based attempt number that failed.
    pub attempt: u32,
    /// Error message captured from the failed attempt.
    pub error: String,
    /// Delay slept before the next attempt.
    pub delay: Duration,
}

/// Aggregate metadata describing how many attempts a call took.
#[derive(Debug, Clone, Default)]
pub struct RetryMetadata {
    /// Total attempts made, including the final (successful or failing) one.
    pub total_attempts: u32,
    /// Every failed attempt, in order.
    pub failed_attempts: Vec<RetryAttempt>,
    /// Wall-clock time spent across all attempts and sleeps.
    pub total_duration: Duration,
}

/// The successful value paired with the metadata describing how it was obtained.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    /// The operation's successful result.
    pub value: T,
    /// How many attempts, and how long, it took to get there.
    pub metadata: RetryMetadata,
}

/// Compute the next decorrelated-jitter delay given the previous one.
#[must_use]
pub fn next_delay(config: &RetryConfig, previous: Duration) -> Duration {
    let base = config.base_delay;
    let ceiling = base.max(previous.saturating_mul(3));
    let lo = base.as_secs_f64();
    let hi = ceiling.as_secs_f64().max(lo);
    let sampled = if hi > lo {
        rand::thread_rng().gen_range(lo..=hi)
    } else {
        lo
    };
    Duration::from_secs_f64(sampled).min(config.max_delay)
}

/// Default retryability predicate: retry on [`fmf_error::FmfErrorKind::Provider`]
/// or [`fmf_error::FmfErrorKind::Inference`] errors carrying an HTTP-like
/// `status_code` context of 429 or 5xx, and on any [`fmf_error::FmfErrorKind::Connector`]
/// error (transient I/O is assumed retryable by default).
#[must_use]
pub fn default_predicate(err: &FmfError) -> bool {
    use fmf_error::FmfErrorKind;
    match err.kind {
        FmfErrorKind::Connector => true,
        FmfErrorKind::Provider | FmfErrorKind::Inference => err
            .context
            .get("status_code")
            .and_then(|v| v.as_u64())
            .is_some_and(|code| code == 429 || (500..600).contains(&code)),
        _ => false,
    }
}

/// Retry an async operation under a decorrelated-jitter policy.
///
/// `op` is invoked up to `config.max_attempts` times. Between attempts the
/// caller sleeps for [`next_delay`]. Retrying stops as soon as `retryable`
/// returns `false` for the most recent error, or either bound in `config`
/// is exceeded.
pub async fn retry_async<T, E, F, Fut>(
    config: &RetryConfig,
    retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<RetryOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let mut attempt = 0u32;
    let mut delay = Duration::ZERO;
    let mut failed_attempts = Vec::new();

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                return Ok(RetryOutcome {
                    value,
                    metadata: RetryMetadata {
                        total_attempts: attempt,
                        failed_attempts,
                        total_duration: start.elapsed(),
                    },
                });
            }
            Err(err) => {
                let elapsed = start.elapsed();
                let can_retry = attempt < config.max_attempts
                    && elapsed < config.max_elapsed
                    && retryable(&err);
                if !can_retry {
                    warn!(attempt, %err, "retry exhausted");
                    return Err(err);
                }
                delay = next_delay(config, delay);
                if elapsed + delay > config.max_elapsed {
                    warn!(attempt, %err, "retry would exceed max_elapsed, giving up");
                    return Err(err);
                }
                debug!(attempt, %err, delay_ms = delay.as_millis() as u64, "retrying");
                failed_attempts.push(RetryAttempt {
                    attempt,
                    error: err.to_string(),
                    delay,
                });
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_elapsed: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_try_without_sleeping() {
        let outcome = retry_async(
            &fast_config(),
            |_e: &String| true,
            || async { Ok::<_, String>(42) },
        )
        .await
        .unwrap();
        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.metadata.total_attempts, 1);
        assert!(outcome.metadata.failed_attempts.is_empty());
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let outcome = retry_async(
            &fast_config(),
            |_e: &String| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.value, 7);
        assert_eq!(outcome.metadata.total_attempts, 3);
        assert_eq!(outcome.metadata.failed_attempts.len(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let result = retry_async(
            &fast_config(),
            |_e: &String| true,
            || async { Err::<i32, _>("always fails".to_string()) },
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let _ = retry_async(
            &fast_config(),
            |_e: &String| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, _>("fatal".to_string()) }
            },
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn next_delay_respects_ceiling() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(150),
            max_elapsed: Duration::from_secs(10),
        };
        for _ in 0..50 {
            let d = next_delay(&config, Duration::from_millis(500));
            assert!(d <= config.max_delay);
            assert!(d >= Duration::from_millis(1));
        }
    }

    #[test]
    fn default_predicate_retries_429_and_5xx() {
        let mut err = FmfError::provider("rate limited").with_context("status_code", 429);
        assert!(default_predicate(&err));
        err = FmfError::provider("server error").with_context("status_code", 503);
        assert!(default_predicate(&err));
        err = FmfError::provider("bad request").with_context("status_code", 400);
        assert!(!default_predicate(&err));
    }
}
