use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leasewarden_core::AppResult;
use leasewarden_domain::{LeaseAcquireResult, LeaseCandidate, LeaseFilter, LeaseId};
use tokio_util::sync::CancellationToken;

/// Transactional backing store for lease rows.
///
/// Implementations must make [`LeaseStore::conditional_write`] atomic under
/// serializable-equivalent isolation and delegate the verdict to
/// `leasewarden_domain::evaluate_conditional_write`.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Reads the current row, evaluates `candidate` against it and writes the
    /// resulting row when allowed.
    ///
    /// A rejected candidate is an `Ok` result carrying the current holder's
    /// metadata. A store-detected ordering conflict must surface as
    /// `AppError::TransientConflict`, and cancellation observed before commit
    /// as `AppError::Cancelled` with nothing persisted.
    async fn conditional_write(
        &self,
        candidate: &LeaseCandidate,
        now: DateTime<Utc>,
        filter: Option<&LeaseFilter>,
        cancellation: &CancellationToken,
    ) -> AppResult<LeaseAcquireResult>;

    /// Best-effort read of the current holder metadata. Never returns a ticket.
    async fn read_last_known_state(
        &self,
        lease_id: &LeaseId,
        cancellation: &CancellationToken,
    ) -> AppResult<LeaseAcquireResult>;
}
