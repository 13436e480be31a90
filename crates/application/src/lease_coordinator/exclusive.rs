use std::future::Future;
use std::time::Duration;

use leasewarden_core::{AppError, AppResult};
use leasewarden_domain::{LeaseAcquireResult, LeaseFilter, LeaseReleaseResult, LeaseTicket};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::LeaseCoordinator;

/// Result of [`LeaseCoordinator::run_exclusive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusiveRunOutcome<T> {
    /// The lease was held elsewhere or the filter declined; nothing ran.
    Skipped(LeaseAcquireResult),
    /// The task ran under the lease and the lease was handed back.
    Completed {
        /// Task output.
        output: T,
        /// Outcome of the closing release.
        release: LeaseReleaseResult,
    },
    /// The hold could not be kept alive, so the task was dropped unfinished.
    LeaseLost {
        /// Outcome of the closing release.
        release: LeaseReleaseResult,
    },
}

enum Interruption {
    LeaseLost,
    Failed(AppError),
}

impl LeaseCoordinator {
    /// Runs `task` only if the lease can be acquired, releasing it afterwards.
    ///
    /// While the task runs the lease is renewed every third of `duration`.
    /// When a renewal is rejected, fails, or does not land before the hold
    /// runs out, the task is dropped so it never outlives the lease.
    ///
    /// The release is attempted even when the task fails or `cancellation`
    /// fired while it ran; a task error is returned after the release.
    pub async fn run_exclusive<T, F, Fut>(
        &self,
        lease_id: &str,
        duration: Duration,
        filter: Option<LeaseFilter>,
        cancellation: &CancellationToken,
        task: F,
    ) -> AppResult<ExclusiveRunOutcome<T>>
    where
        F: FnOnce(LeaseTicket) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let acquire_started = Instant::now();
        let acquired = self
            .try_acquire(lease_id, duration, filter, cancellation)
            .await?;
        let Some(ticket) = acquired.ticket.clone() else {
            return Ok(ExclusiveRunOutcome::Skipped(acquired));
        };

        // `None` marks a task dropped because the hold was lost.
        let run = tokio::select! {
            biased;
            result = task(ticket.clone()) => result.map(Some),
            interruption = self.keep_alive(&ticket, duration, acquire_started, cancellation) => {
                match interruption {
                    Interruption::LeaseLost => Ok(None),
                    Interruption::Failed(error) => Err(error),
                }
            }
        };

        // The caller's token may already be cancelled; the hand-back must not be.
        let release = self.release(&ticket, &CancellationToken::new()).await;

        match (run, release) {
            (Ok(Some(output)), Ok(release)) => {
                Ok(ExclusiveRunOutcome::Completed { output, release })
            }
            (Ok(None), Ok(release)) => Ok(ExclusiveRunOutcome::LeaseLost { release }),
            (Ok(_), Err(error)) | (Err(error), Ok(_)) => Err(error),
            (Err(task_error), Err(release_error)) => {
                warn!(
                    lease_id = %ticket.lease_id,
                    error = %release_error,
                    "failed to release lease after task failure"
                );
                Err(task_error)
            }
        }
    }

    /// Renews `ticket` until the hold is lost; never returns while it is kept.
    ///
    /// `held_from` is taken before the write that granted the hold, so the
    /// local deadline never runs past the stored expiry.
    async fn keep_alive(
        &self,
        ticket: &LeaseTicket,
        duration: Duration,
        mut held_from: Instant,
        cancellation: &CancellationToken,
    ) -> Interruption {
        let renew_every = duration / 3;

        loop {
            sleep_until_after(held_from, renew_every).await;

            let renew_started = Instant::now();
            let renewed = tokio::select! {
                biased;
                renewed = self.try_renew(ticket, duration, cancellation) => renewed,
                () = sleep_until_after(held_from, duration) => {
                    warn!(lease_id = %ticket.lease_id, "lease lapsed before renewal landed");
                    return Interruption::LeaseLost;
                }
            };

            match renewed {
                Ok(result) if result.is_lease_acquired() => held_from = renew_started,
                Ok(_) => {
                    warn!(
                        lease_id = %ticket.lease_id,
                        "lease taken over while task was running"
                    );
                    return Interruption::LeaseLost;
                }
                Err(error) => return Interruption::Failed(error),
            }
        }
    }
}

async fn sleep_until_after(from: Instant, after: Duration) {
    match from.checked_add(after) {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
