//! Per-provider token bucket rate limiting.
//!
//! Each provider declares `(requests, window_seconds)`; a bucket of that
//! capacity refills continuously over the window. Search and download both
//! consume one token.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use super::types::RateLimit;

/// Token bucket for a single provider.
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// The bucket starts full, allowing an immediate burst up to capacity.
    pub fn new(limit: RateLimit) -> Self {
        let capacity = limit.requests.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / limit.window_seconds.max(1) as f64,
            last_refill: Instant::now(),
        }
    }

    /// Take a token, or learn how long to wait for one.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let needed = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(needed / self.refill_per_sec))
        }
    }

    pub fn set_limit(&mut self, limit: RateLimit) {
        self.capacity = limit.requests.max(1) as f64;
        self.refill_per_sec = self.capacity / limit.window_seconds.max(1) as f64;
        self.tokens = self.tokens.min(self.capacity);
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// One bucket per provider.
///
/// `acquire` blocks the calling task until a token is available, which also
/// serializes callers against a saturated provider.
pub struct RateLimiterPool {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiterPool {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, provider: &str, limit: RateLimit) {
        let mut buckets = self.buckets.lock().await;
        match buckets.get_mut(provider) {
            Some(bucket) => bucket.set_limit(limit),
            None => {
                buckets.insert(provider.to_string(), TokenBucket::new(limit));
            }
        }
    }

    /// Wait until a token is available for the provider, then consume it.
    /// Unknown providers pass through unlimited.
    pub async fn acquire(&self, provider: &str) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                match buckets.get_mut(provider) {
                    Some(bucket) => match bucket.try_acquire() {
                        Ok(()) => return,
                        Err(wait) => wait,
                    },
                    None => return,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking variant, for callers that prefer to fail fast.
    pub async fn try_acquire(&self, provider: &str) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock().await;
        match buckets.get_mut(provider) {
            Some(bucket) => bucket.try_acquire(),
            None => Ok(()),
        }
    }
}

impl Default for RateLimiterPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(requests: u32, window_seconds: u64) -> RateLimit {
        RateLimit {
            requests,
            window_seconds,
        }
    }

    #[tokio::test]
    async fn test_bucket_starts_full() {
        let mut bucket = TokenBucket::new(limit(5, 60));
        for _ in 0..5 {
            assert!(bucket.try_acquire().is_ok());
        }
        assert!(bucket.try_acquire().is_err());
    }

    #[tokio::test]
    async fn test_wait_time_reflects_refill_rate() {
        let mut bucket = TokenBucket::new(limit(60, 60));
        for _ in 0..60 {
            bucket.try_acquire().unwrap();
        }
        let wait = bucket.try_acquire().unwrap_err();
        // One token per second: the wait is at most one second.
        assert!(wait <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_set_limit_clamps_tokens() {
        let mut bucket = TokenBucket::new(limit(10, 60));
        bucket.set_limit(limit(2, 60));
        bucket.try_acquire().unwrap();
        bucket.try_acquire().unwrap();
        assert!(bucket.try_acquire().is_err());
    }

    #[tokio::test]
    async fn test_pool_unknown_provider_is_unlimited() {
        let pool = RateLimiterPool::new();
        for _ in 0..100 {
            pool.acquire("unregistered").await;
        }
    }

    #[tokio::test]
    async fn test_pool_try_acquire_saturates() {
        let pool = RateLimiterPool::new();
        pool.register("os", limit(2, 3600)).await;
        assert!(pool.try_acquire("os").await.is_ok());
        assert!(pool.try_acquire("os").await.is_ok());
        assert!(pool.try_acquire("os").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_acquire_waits_for_refill() {
        let pool = RateLimiterPool::new();
        pool.register("os", limit(1, 1)).await;
        pool.acquire("os").await;

        // Second acquire needs the refill; with paused time the sleep is
        // auto-advanced, so this completes without wall-clock delay.
        pool.acquire("os").await;
    }
}
