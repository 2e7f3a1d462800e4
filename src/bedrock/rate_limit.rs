//! Token-bucket rate limiter for outbound Bedrock calls.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct Bucket {
    tokens: f64,
    last_update: Instant,
}

pub struct RateLimiter {
    requests_per_second: f64,
    burst_size: f64,
    bucket: Mutex<Bucket>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10.0, 20)
    }
}

impl RateLimiter {
    /// Starts full: `burst_size` calls pass without waiting.
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size: burst_size as f64,
            bucket: Mutex::new(Bucket { tokens: burst_size as f64, last_update: Instant::now() }),
        }
    }

    /// Wait until a request may be sent. Returns `true` when the caller had to wait.
    pub async fn acquire(&self) -> bool {
        let mut b = self.bucket.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(b.last_update).as_secs_f64();
        b.tokens = (b.tokens + elapsed * self.requests_per_second).min(self.burst_size);
        b.last_update = now;

        if b.tokens < 1.0 {
            let wait = (1.0 - b.tokens) / self.requests_per_second;
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            // The wait is charged to this caller.
            b.tokens = 0.0;
            b.last_update = Instant::now();
            true
        } else {
            b.tokens -= 1.0;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_passes_then_waits() {
        let rl = RateLimiter::new(2.0, 3);
        let start = Instant::now();
        for _ in 0..3 {
            assert!(!rl.acquire().await);
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(rl.acquire().await);
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn refills_over_time() {
        let rl = RateLimiter::new(1.0, 1);
        assert!(!rl.acquire().await);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!rl.acquire().await);
    }
}
