use leasewarden_core::AppResult;
use leasewarden_domain::{LeaseCandidate, LeaseReleaseResult, LeaseTicket};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::LeaseCoordinator;

impl LeaseCoordinator {
    /// Gives up the hold identified by `ticket` before it lapses.
    ///
    /// A stale ticket leaves the current holder untouched and reports
    /// `is_released == false`.
    pub async fn release(
        &self,
        ticket: &LeaseTicket,
        cancellation: &CancellationToken,
    ) -> AppResult<LeaseReleaseResult> {
        let now = self.now();
        let candidate = LeaseCandidate::release(ticket, now);

        let result = LeaseReleaseResult::from(
            self.conditional_write(&candidate, now, None, cancellation)
                .await?,
        );

        if result.is_released {
            info!(lease_id = %ticket.lease_id, "lease released");
        } else {
            warn!(
                lease_id = %ticket.lease_id,
                token = %ticket.token,
                "lease release ignored, ticket is stale"
            );
        }

        Ok(result)
    }
}
