//! Outbound rate limiting — one byte-weighted token bucket shared by
//! every chunk sender of every active transfer.
//!
//! Unlike a per-message allow/drop check, chunk senders block until
//! the bucket can cover their byte count, so the aggregate send rate
//! converges on the configured budget.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ferry_core::limits::RATE_LIMIT_BYTES_PER_SEC;
use tokio::sync::Mutex;

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Shared token bucket. Cheap to clone.
pub struct RateLimiter {
    bucket: Arc<Mutex<Bucket>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_rate(RATE_LIMIT_BYTES_PER_SEC)
    }

    /// Bucket with `bytes_per_sec` refill and a one-second burst.
    pub fn with_rate(bytes_per_sec: u64) -> Self {
        let rate = bytes_per_sec as f64;
        Self {
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: rate,
                capacity: rate,
                refill_rate: rate,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Block until `bytes` tokens are available, then take them.
    pub async fn acquire(&self, bytes: usize) {
        let mut need = bytes as f64;
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                bucket.refill();
                // A request larger than the bucket could never be
                // satisfied in one piece; clamp it to the capacity.
                need = need.min(bucket.capacity);
                if bucket.tokens >= need {
                    bucket.tokens -= need;
                    return;
                }
                Duration::from_secs_f64((need - bucket.tokens) / bucket.refill_rate)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            bucket: self.bucket.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_immediate() {
        let limiter = RateLimiter::with_rate(1_000_000);
        let start = Instant::now();
        limiter.acquire(400_000).await;
        limiter.acquire(400_000).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn depleted_bucket_blocks_for_refill() {
        let limiter = RateLimiter::with_rate(1_000_000);
        limiter.acquire(1_000_000).await;

        // Bucket is empty; half a megabyte needs ~500ms of refill.
        let start = Instant::now();
        limiter.acquire(500_000).await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(450), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn shared_across_clones() {
        let limiter = RateLimiter::with_rate(1_000_000);
        let other = limiter.clone();
        limiter.acquire(1_000_000).await;

        // The clone sees the same depleted bucket.
        let start = Instant::now();
        other.acquire(200_000).await;
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn oversized_request_is_clamped() {
        let limiter = RateLimiter::with_rate(100_000);
        // Must not hang forever waiting for more tokens than the
        // bucket can ever hold.
        tokio::time::timeout(Duration::from_secs(5), limiter.acquire(10_000_000))
            .await
            .expect("clamped acquire should finish");
    }
}
