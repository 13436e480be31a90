use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use leasewarden_core::{AppError, AppResult};
use leasewarden_domain::{LeaseAcquireResult, LeaseCandidate, LeaseFilter};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::lease_ports::{Clock, LeaseStore};
use crate::retry_policy::{RetryOutcome, RetryPolicy};

mod acquire;
mod exclusive;
mod release;

pub use exclusive::ExclusiveRunOutcome;

/// Distributed mutual exclusion over a transactional lease store.
///
/// Holds no per-lease state between calls; every verdict comes from the
/// store's conditional write, so one instance can be shared freely across
/// tasks and processes.
#[derive(Clone)]
pub struct LeaseCoordinator {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
}

impl LeaseCoordinator {
    /// Creates a coordinator with the default retry policy.
    #[must_use]
    pub fn new(store: Arc<dyn LeaseStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy used for store writes.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Returns the retry policy in use.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Runs one conditional write through the retry policy.
    ///
    /// Exhausted retries fall back to the last known state so that contention
    /// never reaches callers as an error.
    async fn conditional_write(
        &self,
        candidate: &LeaseCandidate,
        now: DateTime<Utc>,
        filter: Option<&LeaseFilter>,
        cancellation: &CancellationToken,
    ) -> AppResult<LeaseAcquireResult> {
        let outcome = self
            .retry_policy
            .run(candidate.intent.as_str(), cancellation, || {
                self.store
                    .conditional_write(candidate, now, filter, cancellation)
            })
            .await?;

        match outcome {
            RetryOutcome::Completed(result) => Ok(result),
            RetryOutcome::Exhausted { attempts } => {
                warn!(
                    lease_id = %candidate.lease_id(),
                    intent = candidate.intent.as_str(),
                    attempts,
                    "treating lease as contended after repeated conflicts"
                );
                let mut state = self
                    .store
                    .read_last_known_state(candidate.lease_id(), cancellation)
                    .await?;
                state.ticket = None;
                Ok(state)
            }
        }
    }
}

/// Returns `now + duration`, rejecting durations the timestamp range cannot hold.
fn lease_expiry(now: DateTime<Utc>, duration: Duration) -> AppResult<DateTime<Utc>> {
    if duration.is_zero() {
        return Err(AppError::Validation(
            "lease duration must be greater than zero".to_owned(),
        ));
    }

    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|duration| now.checked_add_signed(duration))
        .ok_or_else(|| {
            AppError::Validation(format!("lease duration {duration:?} is out of range"))
        })
}
