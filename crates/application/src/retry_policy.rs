//! Bounded retry of lease store writes on transient conflicts.

use std::future::Future;
use std::time::Duration;

use leasewarden_core::{AppError, AppResult};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Retries an operation on `AppError::TransientConflict` with fixed backoff.
///
/// Every other error propagates on first sight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The operation returned a value.
    Completed(T),
    /// Every attempt ended in a transient conflict.
    Exhausted {
        /// Attempts made, including the first one.
        attempts: u32,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(10))
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` retries after the first attempt.
    #[must_use]
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Returns the retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the fixed delay between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `attempt` until it completes, fails hard, or the budget is spent.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancellation: &CancellationToken,
        mut attempt: F,
    ) -> AppResult<RetryOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut retries = 0_u32;

        loop {
            if cancellation.is_cancelled() {
                return Err(AppError::Cancelled(format!(
                    "{operation} cancelled before store round-trip"
                )));
            }

            match attempt().await {
                Ok(value) => return Ok(RetryOutcome::Completed(value)),
                Err(error) if error.is_transient_conflict() => {
                    if retries >= self.max_retries {
                        warn!(
                            operation,
                            attempts = retries.saturating_add(1),
                            error = %error,
                            "lease store retries exhausted"
                        );
                        return Ok(RetryOutcome::Exhausted {
                            attempts: retries.saturating_add(1),
                        });
                    }

                    retries = retries.saturating_add(1);
                    warn!(
                        operation,
                        retry = retries,
                        max_retries = self.max_retries,
                        delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "transient lease store conflict, retrying"
                    );

                    tokio::select! {
                        biased;
                        () = cancellation.cancelled() => {
                            return Err(AppError::Cancelled(format!(
                                "{operation} cancelled during retry backoff"
                            )));
                        }
                        () = tokio::time::sleep(self.delay) => {}
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use leasewarden_core::{AppError, AppResult};
    use tokio_util::sync::CancellationToken;

    use super::{RetryOutcome, RetryPolicy};

    fn failing_then_ok(
        calls: &Arc<AtomicU32>,
        failures: u32,
    ) -> impl FnMut() -> std::future::Ready<AppResult<&'static str>> {
        let calls = calls.clone();
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if call < failures {
                Err(AppError::TransientConflict("serialization failure".to_owned()))
            } else {
                Ok("written")
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_conflicts_within_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = RetryPolicy::default()
            .run("acquire", &CancellationToken::new(), failing_then_ok(&calls, 3))
            .await;

        assert!(matches!(outcome, Ok(RetryOutcome::Completed("written"))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_exhaustion_instead_of_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = RetryPolicy::default()
            .run("acquire", &CancellationToken::new(), failing_then_ok(&calls, 10))
            .await;

        assert!(matches!(outcome, Ok(RetryOutcome::Exhausted { attempts: 4 })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn infrastructure_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome: AppResult<RetryOutcome<()>> = RetryPolicy::default()
            .run("renew", &CancellationToken::new(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err(AppError::Internal("connection refused".to_owned())))
            })
            .await;

        assert!(matches!(outcome, Err(AppError::Internal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_skips_the_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let outcome = RetryPolicy::default()
            .run("release", &cancellation, failing_then_ok(&calls, 0))
            .await;

        assert!(matches!(outcome, Err(AppError::Cancelled(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancellation = CancellationToken::new();
        let policy = RetryPolicy::new(3, Duration::from_secs(3600));

        let canceller = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = policy
            .run("acquire", &cancellation, failing_then_ok(&calls, 10))
            .await;

        assert!(matches!(outcome, Err(AppError::Cancelled(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
