use std::time::Duration;

use leasewarden_core::AppResult;
use leasewarden_domain::{LeaseAcquireResult, LeaseCandidate, LeaseFilter, LeaseId, LeaseTicket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{LeaseCoordinator, lease_expiry};

impl LeaseCoordinator {
    /// Attempts to take the lease named `lease_id` for `duration`.
    ///
    /// Succeeds only when no live holder exists and `filter`, if any, accepts
    /// the pre-write state. The returned ticket carries a fresh token.
    pub async fn try_acquire(
        &self,
        lease_id: &str,
        duration: Duration,
        filter: Option<LeaseFilter>,
        cancellation: &CancellationToken,
    ) -> AppResult<LeaseAcquireResult> {
        let lease_id = LeaseId::new(lease_id)?;
        let now = self.now();
        let expires = lease_expiry(now, duration)?;
        let candidate = LeaseCandidate::acquire(lease_id, now, expires);

        let result = self
            .conditional_write(&candidate, now, filter.as_ref(), cancellation)
            .await?;

        if result.is_lease_acquired() {
            info!(
                lease_id = %candidate.lease_id(),
                token = %candidate.lease.token,
                expires = ?result.expires,
                "lease acquired"
            );
        } else {
            debug!(
                lease_id = %candidate.lease_id(),
                held_until = ?result.expires,
                last_acquired_at = ?result.last_acquired_at,
                "lease not acquired"
            );
        }

        Ok(result)
    }

    /// Extends the hold identified by `ticket` to `now + duration`.
    ///
    /// Fails when the stored token no longer matches the ticket.
    pub async fn try_renew(
        &self,
        ticket: &LeaseTicket,
        duration: Duration,
        cancellation: &CancellationToken,
    ) -> AppResult<LeaseAcquireResult> {
        let now = self.now();
        let expires = lease_expiry(now, duration)?;
        let candidate = LeaseCandidate::renew(ticket, expires);

        let result = self
            .conditional_write(&candidate, now, None, cancellation)
            .await?;

        if result.is_lease_acquired() {
            debug!(
                lease_id = %ticket.lease_id,
                expires = ?result.expires,
                "lease renewed"
            );
        } else {
            info!(
                lease_id = %ticket.lease_id,
                token = %ticket.token,
                "lease renewal rejected, ownership lost"
            );
        }

        Ok(result)
    }
}
