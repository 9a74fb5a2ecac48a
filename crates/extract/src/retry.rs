use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

/// The error of the final attempt, with how many attempts were made
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: usize,
    pub error: E,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Backoff doubles up to `max_backoff`.
    pub async fn retry<F, Fut, T, E>(
        &self,
        operation_name: &str,
        retryable: impl Fn(&E) -> bool,
        mut f: F,
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            attempt += 1;
            match f().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempts = attempt,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if attempt >= self.max_attempts || !retryable(&e) {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "Operation failed, giving up"
                        );
                        return Err(Exhausted { attempts: attempt, error: e });
                    }

                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );

                    sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(attempts: usize) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result = fast_policy(3)
            .retry("op", |_: &String| true, move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("flaky".to_string())
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_at_attempt_budget() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast_policy(3)
            .retry("op", |_: &String| true, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.error, "down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast_policy(5)
            .retry("op", |_: &String| false, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("fatal".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
