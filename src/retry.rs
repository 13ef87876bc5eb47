//! Bounded retry with exponential backoff, shared by every remote fetch.

use log::{debug, warn};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry policy parameterized by attempt count and base delay.
///
/// The delay after failed attempt `n` (1-based) is `base_delay * 2^(n-1)`.
/// No delay follows the final attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay }
    }

    /// Delay to wait after the given failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Runs `operation` until it succeeds or the attempts are used up, returning the last error.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}/{}", label, attempt, self.max_attempts);
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= self.max_attempts => {
                    warn!("{} failed after {} attempt(s): {}", label, attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        label, attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[test]
    fn delays_double_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_with_backoff() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();
        let recorded = attempts.clone();
        let result: Result<(), String> = policy
            .run("test fetch", || {
                recorded.lock().unwrap().push(start.elapsed());
                async { Err("offline".to_string()) }
            })
            .await;
        assert_eq!(result, Err("offline".to_string()));
        let attempts = attempts.lock().unwrap();
        assert_eq!(
            *attempts,
            vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(3)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stops_retrying_on_success() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: Result<u32, String> = policy
            .run("test fetch", || {
                calls += 1;
                let outcome = if calls < 2 { Err("flaky".to_string()) } else { Ok(calls) };
                async move { outcome }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls, 2);
    }
}
