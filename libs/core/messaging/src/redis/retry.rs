use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::iter;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff policy for opening a Redis connection.
///
/// Delays double from `initial_delay` up to `max_delay`. With jitter each
/// delay is scaled into `[50%, 100%)` of its nominal value.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// The wait before each retry, one item per allowed retry.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let max = self.max_delay;
        let jitter = self.jitter.then(RandomState::new);

        iter::successors(Some(self.initial_delay.min(max)), move |d| {
            Some(d.saturating_mul(2).min(max))
        })
        .take(self.max_retries as usize)
        .enumerate()
        .map(move |(n, delay)| match &jitter {
            Some(state) => {
                let percent = 50 + (state.hash_one(n) % 50) as u32;
                delay * percent / 100
            }
            None => delay,
        })
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

/// Run `operation` until it succeeds or the policy runs out of retries.
///
/// The last error is returned as is.
pub async fn retry_with_backoff<F, Fut, T, E>(mut operation: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delays = config.delays();
    let mut attempt: u32 = 1;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempts = attempt, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let Some(delay) = delays.next() else {
            warn!(attempts = attempt, error = %err, "Giving up");
            return Err(err);
        };

        debug!(
            attempt = attempt,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn failing_until(successes_after: u32) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<&'static str, String>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let op = move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < successes_after {
                Err("connection refused".to_string())
            } else {
                Ok("PONG")
            })
        };
        (calls, op)
    }

    #[tokio::test]
    async fn test_first_success_does_not_retry() {
        let (calls, op) = failing_until(0);
        let result = retry_with_backoff(op, &RetryConfig::default()).await;

        assert_eq!(result.unwrap(), "PONG");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_failures() {
        let (calls, op) = failing_until(2);
        let result = retry_with_backoff(op, &RetryConfig::new().without_jitter()).await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_retries_run_out() {
        let (calls, op) = failing_until(u32::MAX);
        let result = retry_with_backoff(op, &RetryConfig::new().with_max_retries(2)).await;

        assert_eq!(result.unwrap_err(), "connection refused");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delays_double_up_to_the_cap() {
        let config = RetryConfig::new()
            .with_max_retries(5)
            .with_initial_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_secs(1))
            .without_jitter();

        let delays: Vec<u64> = config.delays().map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![250, 500, 1000, 1000, 1000]);
    }

    #[test]
    fn test_jittered_delays_stay_in_range() {
        let config = RetryConfig::new()
            .with_max_retries(50)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(1));

        for delay in config.delays() {
            assert!(delay >= Duration::from_millis(500) && delay < Duration::from_secs(1));
        }
    }

    #[test]
    fn test_no_retries_means_no_delays() {
        assert_eq!(RetryConfig::new().with_max_retries(0).delays().count(), 0);
    }
}
