//! Atomic token bucket, grounded on the teacher's bandwidth limiter
//! (`pulith_fetch::core::bandwidth::TokenBucket`), trimmed to the pacer's
//! needs: no adaptive congestion control, just acquire/refill.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::time::sleep;

pub struct TokenBucket {
    tokens: AtomicU64,
    capacity: u64,
    refill_rate: u64,
    last_refill: Mutex<Instant>,
}

impl TokenBucket {
    pub fn new(capacity: u64, refill_rate: u64) -> Self {
        Self {
            tokens: AtomicU64::new(capacity),
            capacity,
            refill_rate: refill_rate.max(1),
            last_refill: Mutex::new(Instant::now()),
        }
    }

    fn refill(&self) {
        let now = Instant::now();
        let mut last = self.last_refill.lock().unwrap();
        let elapsed = now.duration_since(*last);
        if elapsed.as_secs_f64() > 0.0 {
            let add = (self.refill_rate as f64 * elapsed.as_secs_f64()) as u64;
            if add > 0 {
                let current = self.tokens.load(Ordering::Relaxed);
                let next = (current + add).min(self.capacity);
                self.tokens.store(next, Ordering::Relaxed);
                *last = now;
            }
        }
    }

    pub fn try_acquire(&self, n: u64) -> bool {
        self.refill();
        let current = self.tokens.load(Ordering::Relaxed);
        if current >= n {
            self.tokens
                .compare_exchange(current, current - n, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        } else {
            false
        }
    }

    pub async fn acquire(&self, n: u64) {
        loop {
            if self.try_acquire(n) {
                return;
            }
            self.refill();
            let current = self.tokens.load(Ordering::Relaxed);
            let deficit = n.saturating_sub(current);
            let wait = Duration::from_secs_f64(deficit as f64 / self.refill_rate as f64);
            sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_immediately_within_capacity() {
        let bucket = TokenBucket::new(10, 10);
        bucket.acquire(5).await;
        assert!(bucket.try_acquire(5));
        assert!(!bucket.try_acquire(1));
    }

    #[tokio::test]
    async fn refills_over_time() {
        let bucket = TokenBucket::new(10, 1000);
        bucket.acquire(10).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bucket.try_acquire(1));
    }
}
