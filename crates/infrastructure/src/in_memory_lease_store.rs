use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leasewarden_application::LeaseStore;
use leasewarden_core::{AppError, AppResult};
use leasewarden_domain::{
    Lease, LeaseAcquireResult, LeaseCandidate, LeaseFilter, LeaseId, WriteDecision,
    evaluate_conditional_write,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// In-memory lease store.
///
/// The write lock is held across read, evaluation and write, so conditional
/// writes are serialized and never report transient conflicts.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    rows: RwLock<HashMap<LeaseId, Lease>>,
    write_latency: Option<Duration>,
}

impl InMemoryLeaseStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            write_latency: None,
        }
    }

    /// Delays every staged write by `latency` before it is applied.
    #[must_use]
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = Some(latency);
        self
    }

    /// Returns the persisted row for `lease_id`.
    pub async fn find_lease(&self, lease_id: &LeaseId) -> Option<Lease> {
        self.rows.read().await.get(lease_id).cloned()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn conditional_write(
        &self,
        candidate: &LeaseCandidate,
        now: DateTime<Utc>,
        filter: Option<&LeaseFilter>,
        cancellation: &CancellationToken,
    ) -> AppResult<LeaseAcquireResult> {
        let mut rows = tokio::select! {
            biased;
            () = cancellation.cancelled() => {
                return Err(AppError::Cancelled(format!(
                    "lease '{}' write cancelled while waiting for lock",
                    candidate.lease_id()
                )));
            }
            rows = self.rows.write() => rows,
        };

        let current = rows.get(candidate.lease_id()).cloned();
        let decision = evaluate_conditional_write(current.as_ref(), candidate, now, filter);

        if let Some(latency) = self.write_latency {
            tokio::select! {
                biased;
                () = cancellation.cancelled() => {}
                () = tokio::time::sleep(latency) => {}
            }
        }

        if cancellation.is_cancelled() {
            return Err(AppError::Cancelled(format!(
                "lease '{}' write cancelled before commit",
                candidate.lease_id()
            )));
        }

        if let WriteDecision::Apply(lease) = &decision {
            rows.insert(lease.id.clone(), lease.clone());
        }

        Ok(decision.into_result(current.as_ref()))
    }

    async fn read_last_known_state(
        &self,
        lease_id: &LeaseId,
        _cancellation: &CancellationToken,
    ) -> AppResult<LeaseAcquireResult> {
        let rows = self.rows.read().await;
        Ok(LeaseAcquireResult::contended(
            rows.get(lease_id).map(Lease::info).as_ref(),
        ))
    }
}

#[cfg(test)]
mod tests;
