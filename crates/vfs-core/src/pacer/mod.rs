//! Rate-limited, retry-aware call pacer (spec §4.1, §5).
//!
//! A `Pacer` enforces a minimum spacing between calls made through it and
//! retries a caller-supplied closure up to a bound, honoring exponential
//! backoff and `Retry-After`-style overrides. It does not know about HTTP;
//! [`RetryClassifier`] (in the `http` module) decides what's retryable.

mod bucket;

pub use bucket::TokenBucket;

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::Error;

/// `base * 2^retry_count`, saturating. Same formula the teacher's upload/
/// download retry path uses.
pub fn retry_delay(retry_count: u32, base: Duration) -> Duration {
    let multiplier = 2_u32.saturating_pow(retry_count);
    base.saturating_mul(multiplier)
}

#[derive(Debug, Clone)]
pub struct PacerConfig {
    /// Minimum spacing enforced between successive calls.
    pub min_sleep: Duration,
    /// Base backoff used by `retry_delay` after a retryable failure.
    pub backoff_base: Duration,
    /// Upper bound a single backoff sleep is clamped to.
    pub max_sleep: Duration,
    /// Maximum number of retries before giving up.
    pub max_retries: u32,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            min_sleep: Duration::from_millis(10),
            backoff_base: Duration::from_millis(100),
            max_sleep: Duration::from_secs(60),
            max_retries: 10,
        }
    }
}

/// A shared rate limiter + retry loop. One instance is owned per `FsHandle`
/// and shared across all of its API calls (spec §5); adapters may also keep
/// a separate zero-delay `Pacer` for one-shot retries.
///
/// Only the token bucket is shared state — the retry count is local to each
/// `call()` invocation, since concurrent calls through the same `Pacer` must
/// not share a retry budget.
pub struct Pacer {
    config: PacerConfig,
    bucket: TokenBucket,
}

impl Pacer {
    pub fn new(config: PacerConfig) -> Self {
        // One token per `min_sleep` interval: a spacing primitive, not a
        // bandwidth limiter — capacity of 1 means no bursting past the
        // configured minimum gap.
        let rate = if config.min_sleep.is_zero() {
            u64::MAX
        } else {
            (Duration::from_secs(1).as_nanos() / config.min_sleep.as_nanos().max(1)).max(1) as u64
        };
        Self {
            bucket: TokenBucket::new(1, rate.max(1)),
            config,
        }
    }

    pub fn zero_delay() -> Self {
        Self::new(PacerConfig {
            min_sleep: Duration::ZERO,
            ..PacerConfig::default()
        })
    }

    /// Invoke `f`, retrying while it reports `(true, err)` up to the
    /// configured bound. `f` itself classifies retryability (the HTTP
    /// pipeline's `RetryClassifier` typically drives that decision) and may
    /// return an explicit `Duration` override (e.g. from `Retry-After`).
    pub async fn call<F, Fut, T>(&self, mut f: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = PacerOutcome<T>>,
    {
        self.bucket.acquire(1).await;
        let mut retries = 0u32;
        loop {
            match f().await {
                PacerOutcome::Done(v) => {
                    return Ok(v);
                }
                PacerOutcome::Retry { err, after } => {
                    let n = retries;
                    retries += 1;
                    if n >= self.config.max_retries {
                        warn!(retries = n, "pacer: retry budget exhausted");
                        return Err(err);
                    }
                    let delay = after
                        .unwrap_or_else(|| retry_delay(n, self.config.backoff_base))
                        .min(self.config.max_sleep);
                    debug!(retries = n, ?delay, "pacer: sleeping before retry");
                    sleep(delay).await;
                    self.bucket.acquire(1).await;
                }
                PacerOutcome::Fatal(err) => return Err(err),
            }
        }
    }
}

/// What a pacer-driven closure reports each attempt.
pub enum PacerOutcome<T> {
    Done(T),
    /// Retryable; `after` overrides the computed backoff (e.g. `Retry-After`).
    Retry { err: Error, after: Option<Duration> },
    /// Not retryable — surface immediately.
    Fatal(Error),
}
