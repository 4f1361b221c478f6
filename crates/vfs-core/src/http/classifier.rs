//! Retry classification policy (spec §4.1).

use std::time::Duration;

use super::client::HttpResponse;

/// Asked to expire the current token before a 401-triggered retry (spec
/// §4.1, §5). Adapters implement this against their OAuth2 token store.
pub trait TokenRenewer: Send + Sync {
    fn expire_token(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    RetryAfter(Duration),
    RenewTokenAndRetry,
    Fatal,
}

/// Status codes retried unconditionally (spec §4.1): 408, 429, 500, 502,
/// 503, 504, 509. 401 and 423 are conditional — see [`RetryClassifier`].
const UNCONDITIONAL_RETRY: &[u16] = &[408, 429, 500, 502, 503, 504, 509];

#[derive(Debug, Clone)]
pub struct RetryClassifier {
    /// Some providers treat 423 (Locked) as retryable; spec §4.1 calls this
    /// "provider-specific if the adapter opts in".
    pub retry_423: bool,
    /// Whether a 401 should trigger a token-renew-then-retry. Requires the
    /// adapter to actually have a renewer installed at the pipeline level;
    /// this flag only says "this 401 looks like an expired/invalid token".
    pub retry_401: bool,
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self {
            retry_423: false,
            retry_401: true,
        }
    }
}

impl RetryClassifier {
    pub fn classify(&self, resp: &HttpResponse) -> RetryDecision {
        if let Some(after) = self.retry_after(resp) {
            return RetryDecision::RetryAfter(after);
        }
        match resp.status {
            401 if self.retry_401 => RetryDecision::RenewTokenAndRetry,
            423 if self.retry_423 => RetryDecision::Retry,
            s if UNCONDITIONAL_RETRY.contains(&s) => RetryDecision::Retry,
            _ => RetryDecision::Fatal,
        }
    }

    /// Parses `Retry-After`, `X-RateLimit-Reset` (seconds or epoch-ms,
    /// whichever the header plausibly encodes) on 429/503.
    fn retry_after(&self, resp: &HttpResponse) -> Option<Duration> {
        if !matches!(resp.status, 429 | 503) {
            return None;
        }
        let raw = resp
            .header("Retry-After")
            .or_else(|| resp.header("X-RateLimit-Reset"))?;
        if let Ok(secs) = raw.parse::<u64>() {
            // Heuristic: values large enough to be a millisecond epoch
            // timestamp rather than a delta are treated as "ms from now".
            return Some(if secs > 10_000_000 {
                Duration::from_millis(secs)
            } else {
                Duration::from_secs(secs)
            });
        }
        None
    }
}
