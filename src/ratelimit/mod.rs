/// Token bucket rate limiter pacing outbound broker calls. One bucket per
/// configured rate (backfill vs interactive); each bucket earns tokens at
/// `rate` per second rather than at a flat one-per-second cadence, so a
/// 15/s limiter and a 20/s limiter actually sustain different steady-state
/// throughput once the initial burst capacity is drained.
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub struct RateLimiter {
    capacity: u32,
    tokens: Arc<Mutex<u32>>,
    token_interval: Duration,
    last_refill: Arc<Mutex<Instant>>,
}

impl RateLimiter {
    /// `requests_per_second` is both the burst capacity and the steady
    /// refill rate; a value of 0 is treated as 1 to keep `token_interval`
    /// finite.
    pub fn new(requests_per_second: u32) -> Self {
        let rate = requests_per_second.max(1);
        RateLimiter {
            capacity: rate,
            tokens: Arc::new(Mutex::new(rate)),
            token_interval: Duration::from_secs(1).div_f64(rate as f64),
            last_refill: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Try to acquire a permit without blocking.
    pub async fn try_acquire(&self) -> bool {
        self.refill().await;

        let mut tokens = self.tokens.lock().await;
        if *tokens > 0 {
            *tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Block cooperatively until a permit is available.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire().await {
                return;
            }
            tokio::time::sleep(self.token_interval.min(Duration::from_millis(100))).await;
        }
    }

    /// Earns one token per `token_interval` elapsed since the last refill.
    /// Advances `last_refill` by exactly the earned whole intervals, not to
    /// `now`, so leftover fractional time carries forward instead of being
    /// discarded on every call.
    async fn refill(&self) {
        let mut last_refill = self.last_refill.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(*last_refill);

        let earned = (elapsed.as_nanos() / self.token_interval.as_nanos()) as u32;
        if earned > 0 {
            let mut tokens = self.tokens.lock().await;
            *tokens = (*tokens + earned).min(self.capacity);
            *last_refill += self.token_interval * earned;
        }
    }

    pub async fn available(&self) -> u32 {
        self.refill().await;
        *self.tokens.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refills_after_one_period() {
        let limiter = RateLimiter::new(2);

        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let limiter = RateLimiter::new(3);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(limiter.available().await, 3);
    }

    #[tokio::test]
    async fn higher_configured_rate_refills_faster_than_one_per_second() {
        let limiter = RateLimiter::new(20);
        for _ in 0..20 {
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.try_acquire().await);

        tokio::time::sleep(Duration::from_millis(250)).await;

        // at 20/sec a flat "one token per second" bug would yield 0 here
        assert!(limiter.available().await >= 3);
    }
}
