//! Redis-backed lease store using optimistic `WATCH`/`MULTI`/`EXEC` transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leasewarden_application::LeaseStore;
use leasewarden_core::{AppError, AppResult};
use leasewarden_domain::{
    Lease, LeaseAcquireResult, LeaseCandidate, LeaseFilter, LeaseId, WriteDecision,
    evaluate_conditional_write,
};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Redis implementation of the lease store port.
///
/// Each write opens its own connection so that the `WATCH` guarding it is
/// not shared with other callers. An aborted `EXEC` means the key changed
/// under the transaction and is reported as a transient conflict.
#[derive(Clone)]
pub struct RedisLeaseStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisLeaseStore {
    /// Creates one store adapter.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, lease_id: &LeaseId) -> String {
        format!("{}:{}", self.key_prefix, lease_id.as_str())
    }

    async fn connect(&self) -> AppResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn conditional_write(
        &self,
        candidate: &LeaseCandidate,
        now: DateTime<Utc>,
        filter: Option<&LeaseFilter>,
        cancellation: &CancellationToken,
    ) -> AppResult<LeaseAcquireResult> {
        let lease_id = candidate.lease_id();
        let key = self.key_for(lease_id);

        let staged = async {
            let mut connection = self.connect().await?;

            redis::cmd("WATCH")
                .arg(key.as_str())
                .query_async::<()>(&mut connection)
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to watch lease '{lease_id}': {error}"))
                })?;

            let stored: Option<String> = connection.get(key.as_str()).await.map_err(|error| {
                AppError::Internal(format!("failed to read lease '{lease_id}': {error}"))
            })?;
            let current = stored.as_deref().map(decode_lease).transpose()?;

            Ok::<_, AppError>((connection, current))
        };

        // Dropping the connection discards the WATCH.
        let (mut connection, current) = tokio::select! {
            biased;
            () = cancellation.cancelled() => {
                return Err(AppError::Cancelled(format!(
                    "lease '{lease_id}' {} cancelled before commit",
                    candidate.intent.as_str()
                )));
            }
            staged = staged => staged?,
        };

        let decision = evaluate_conditional_write(current.as_ref(), candidate, now, filter);

        let lease = match decision {
            WriteDecision::Apply(lease) => lease,
            WriteDecision::Reject => {
                unwatch(&mut connection, lease_id).await?;
                debug!(
                    lease_id = %lease_id,
                    intent = candidate.intent.as_str(),
                    "lease conditional write rejected"
                );
                return Ok(WriteDecision::Reject.into_result(current.as_ref()));
            }
        };

        if cancellation.is_cancelled() {
            unwatch(&mut connection, lease_id).await?;
            return Err(AppError::Cancelled(format!(
                "lease '{lease_id}' {} cancelled before commit",
                candidate.intent.as_str()
            )));
        }

        let payload = serde_json::to_string(&lease).map_err(|error| {
            AppError::Internal(format!("failed to encode lease '{lease_id}': {error}"))
        })?;

        let committed: Option<(String,)> = redis::pipe()
            .atomic()
            .set(key.as_str(), payload.as_str())
            .ignore()
            .get(key.as_str())
            .query_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to write lease '{lease_id}': {error}"))
            })?;

        if committed.is_none() {
            return Err(AppError::TransientConflict(format!(
                "lease '{lease_id}' changed during transaction"
            )));
        }

        Ok(LeaseAcquireResult::acquired(&lease))
    }

    async fn read_last_known_state(
        &self,
        lease_id: &LeaseId,
        cancellation: &CancellationToken,
    ) -> AppResult<LeaseAcquireResult> {
        let key = self.key_for(lease_id);

        let read = async {
            let mut connection = self.connect().await?;
            connection
                .get::<_, Option<String>>(key.as_str())
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to read lease '{lease_id}' state: {error}"))
                })
        };

        let stored = tokio::select! {
            biased;
            () = cancellation.cancelled() => {
                return Err(AppError::Cancelled(format!(
                    "lease '{lease_id}' state read cancelled"
                )));
            }
            stored = read => stored?,
        };

        let current = stored.as_deref().map(decode_lease).transpose()?;
        Ok(LeaseAcquireResult::contended(
            current.as_ref().map(Lease::info).as_ref(),
        ))
    }
}

async fn unwatch(connection: &mut MultiplexedConnection, lease_id: &LeaseId) -> AppResult<()> {
    redis::cmd("UNWATCH")
        .query_async::<()>(connection)
        .await
        .map_err(|error| AppError::Internal(format!("failed to unwatch lease '{lease_id}': {error}")))
}

fn decode_lease(value: &str) -> AppResult<Lease> {
    serde_json::from_str(value)
        .map_err(|error| AppError::Internal(format!("failed to decode stored lease: {error}")))
}
