use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::clients::{DownstreamError, Service};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// Exponential: base, 2*base, 4*base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor)
    }

    pub async fn run<T, F, Fut>(&self, service: Service, mut op: F) -> Result<T, DownstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DownstreamError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        service = %service,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = millis(delay),
                        error = %err,
                        "downstream call failed, will retry"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Saturates instead of truncating for very long backoffs.
fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn logged_delay_saturates() {
        assert_eq!(millis(Duration::from_millis(250)), 250);
        assert_eq!(millis(Duration::MAX), u64::MAX);

        let policy = RetryPolicy::new(64, Duration::from_secs(u64::MAX / 2));
        assert_eq!(millis(policy.backoff(40)), u64::MAX);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = policy(3)
            .run(Service::Schedule, move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DownstreamError::Status {
                        service: Service::Schedule,
                        status: 503,
                        message: "busy".to_string(),
                    })
                } else {
                    Ok("S1")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "S1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), _> = policy(5)
            .run(Service::Path, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DownstreamError::Status {
                    service: Service::Path,
                    status: 404,
                    message: "unknown schedule".to_string(),
                })
            })
            .await;

        assert!(matches!(result, Err(DownstreamError::Status { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), _> = policy(2)
            .run(Service::Path, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DownstreamError::Timeout {
                    service: Service::Path,
                })
            })
            .await;

        assert!(matches!(result, Err(DownstreamError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
