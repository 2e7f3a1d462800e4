//! Exponential backoff with jitter around fallible Bedrock calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{error, info, warn};

use super::BedrockError;
use crate::config::{MAX_RETRY_BACKOFF_SECS, RetryConfig};

#[derive(Debug, Clone)]
pub struct RetryHandler {
    config: RetryConfig,
}

/// Loggable snapshot of one failed attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RetryInfo {
    /// 1-based.
    pub attempt: u32,
    pub max_attempts: u32,
    pub error_type: &'static str,
    pub error_message: String,
    pub is_retryable: bool,
    /// Seconds; `None` after the final attempt.
    pub next_delay: Option<f64>,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` is used up. The last error is returned.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, BedrockError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BedrockError>>,
    {
        let max = self.config.max_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => {
                    if attempt > 0 {
                        info!(attempt = attempt + 1, "operation succeeded after retry");
                    }
                    return Ok(v);
                }
                Err(e) => {
                    if !self.should_retry(&e) {
                        error!(error = %e, kind = e.kind(), "non-retryable error");
                        return Err(e);
                    }
                    if attempt + 1 >= max {
                        error!(max_attempts = max, error = %e, "max retry attempts exceeded");
                        return Err(e);
                    }
                    let delay = self.calculate_backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = max,
                        delay_secs = delay,
                        error = %e,
                        "operation failed; retrying"
                    );
                    tokio::time::sleep(self.delay_duration(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    pub fn should_retry(&self, err: &BedrockError) -> bool {
        err.is_retryable_with(&self.config.retryable_errors)
    }

    /// `factor^attempt` plus 10-30% jitter, capped at `max_backoff` seconds.
    /// Overflow to infinity or NaN collapses to the cap.
    pub fn calculate_backoff(&self, attempt: u32) -> f64 {
        let cap = self.cap();
        let base = self.config.backoff_factor.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(0.1..=0.3) * base;
        let delay = base + jitter;
        if delay.is_finite() { delay.clamp(0.0, cap) } else { cap }
    }

    fn cap(&self) -> f64 {
        let max = self.config.max_backoff;
        if max.is_finite() && max >= 0.0 { max.min(MAX_RETRY_BACKOFF_SECS) } else { MAX_RETRY_BACKOFF_SECS }
    }

    fn delay_duration(&self, secs: f64) -> Duration {
        Duration::try_from_secs_f64(secs).unwrap_or_else(|_| Duration::from_secs_f64(self.cap()))
    }

    /// `attempt` is 0-based.
    pub fn retry_info(&self, attempt: u32, err: &BedrockError) -> RetryInfo {
        let max = self.config.max_attempts;
        RetryInfo {
            attempt: attempt + 1,
            max_attempts: max,
            error_type: err.kind(),
            error_message: err.to_string(),
            is_retryable: self.should_retry(err),
            next_delay: (attempt + 1 < max).then(|| self.calculate_backoff(attempt)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn handler(max_attempts: u32) -> RetryHandler {
        RetryHandler::new(RetryConfig {
            max_attempts,
            backoff_factor: 2.0,
            max_backoff: 5.0,
            ..RetryConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_retryable_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out = handler(3)
            .execute(|| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(BedrockError::RateLimit("slow down".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = handler(3)
            .execute(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(BedrockError::service("unavailable", None))
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BedrockError::Service { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = handler(5)
            .execute(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(BedrockError::Model {
                        message: "bad input".into(),
                        code: Some("ValidationException".into()),
                    })
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("ValidationException"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_with_jitter_and_caps() {
        let h = handler(10);
        for _ in 0..50 {
            let d0 = h.calculate_backoff(0);
            assert!((1.09..=1.31).contains(&d0), "{d0}");
            let d2 = h.calculate_backoff(2);
            assert!((4.39..=5.0).contains(&d2), "{d2}");
            assert_eq!(h.calculate_backoff(8), 5.0);
        }
    }

    #[test]
    fn overflowing_backoff_stays_bounded() {
        let h = RetryHandler::new(RetryConfig {
            max_attempts: 5,
            backoff_factor: 1e300,
            max_backoff: f64::INFINITY,
            ..RetryConfig::default()
        });
        for attempt in 0..5 {
            let d = h.calculate_backoff(attempt);
            assert!(d.is_finite() && d <= MAX_RETRY_BACKOFF_SECS, "{attempt}: {d}");
        }
        assert_eq!(h.delay_duration(f64::NAN), Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_survive_huge_factor() {
        let h = RetryHandler::new(RetryConfig {
            max_attempts: 3,
            backoff_factor: 1e300,
            max_backoff: f64::INFINITY,
            ..RetryConfig::default()
        });
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = h
            .execute(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(BedrockError::Timeout("slow".into()))
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BedrockError::Timeout(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_info_has_no_delay_on_last_attempt() {
        let h = handler(3);
        let e = BedrockError::Timeout("slow".into());
        let first = h.retry_info(0, &e);
        assert_eq!(first.attempt, 1);
        assert!(first.is_retryable);
        assert!(first.next_delay.is_some());
        assert_eq!(first.error_type, "timeout");
        assert!(h.retry_info(2, &e).next_delay.is_none());
    }
}
