//! PostgreSQL-backed lease store using the `leases` table.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use leasewarden_application::LeaseStore;
use leasewarden_core::{AppError, AppResult};
use leasewarden_domain::{
    Lease, LeaseAcquireResult, LeaseCandidate, LeaseFilter, LeaseId, LeaseToken, WriteDecision,
    evaluate_conditional_write,
};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// SQLSTATE codes raised when concurrent transactions collide.
///
/// `40001` serialization_failure, `40P01` deadlock_detected, `23505`
/// unique_violation from two first-time inserts of the same lease id.
const TRANSIENT_SQLSTATES: [&str; 3] = ["40001", "40P01", "23505"];

/// PostgreSQL implementation of the lease store port.
#[derive(Clone)]
pub struct PostgresLeaseStore {
    pool: PgPool,
}

impl PostgresLeaseStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseStore for PostgresLeaseStore {
    async fn conditional_write(
        &self,
        candidate: &LeaseCandidate,
        now: DateTime<Utc>,
        filter: Option<&LeaseFilter>,
        cancellation: &CancellationToken,
    ) -> AppResult<LeaseAcquireResult> {
        let (candidate, now) = at_column_precision(candidate, now);
        let candidate = &candidate;
        let lease_id = candidate.lease_id();

        let staged = async {
            let mut transaction = self
                .pool
                .begin()
                .await
                .map_err(|error| store_error("failed to start lease transaction", error))?;

            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *transaction)
                .await
                .map_err(|error| store_error("failed to set lease isolation level", error))?;

            let current = sqlx::query_as::<_, LeaseRow>(
                r#"
                SELECT id, token, expires_at, acquired_at, released_at
                FROM leases
                WHERE id = $1
                FOR UPDATE
                "#,
            )
            .bind(lease_id.as_str())
            .fetch_optional(&mut *transaction)
            .await
            .map_err(|error| store_error(&format!("failed to read lease '{lease_id}'"), error))?
            .map(LeaseRow::into_lease)
            .transpose()?;

            let decision = evaluate_conditional_write(current.as_ref(), candidate, now, filter);

            if let WriteDecision::Apply(lease) = &decision {
                sqlx::query(
                    r#"
                    INSERT INTO leases (id, token, expires_at, acquired_at, released_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, now())
                    ON CONFLICT (id) DO UPDATE
                    SET
                        token = EXCLUDED.token,
                        expires_at = EXCLUDED.expires_at,
                        acquired_at = EXCLUDED.acquired_at,
                        released_at = EXCLUDED.released_at,
                        updated_at = now()
                    "#,
                )
                .bind(lease.id.as_str())
                .bind(lease.token.as_uuid())
                .bind(lease.expires)
                .bind(lease.acquired)
                .bind(lease.released)
                .execute(&mut *transaction)
                .await
                .map_err(|error| {
                    store_error(&format!("failed to write lease '{lease_id}'"), error)
                })?;
            }

            Ok::<_, AppError>((transaction, current, decision))
        };

        // Dropping an open transaction rolls it back.
        let (transaction, current, decision) = tokio::select! {
            biased;
            () = cancellation.cancelled() => {
                return Err(AppError::Cancelled(format!(
                    "lease '{lease_id}' {} cancelled before commit",
                    candidate.intent.as_str()
                )));
            }
            staged = staged => staged?,
        };

        if cancellation.is_cancelled() {
            transaction
                .rollback()
                .await
                .map_err(|error| store_error("failed to roll back lease transaction", error))?;
            return Err(AppError::Cancelled(format!(
                "lease '{lease_id}' {} cancelled before commit",
                candidate.intent.as_str()
            )));
        }

        match decision {
            WriteDecision::Apply(_) => transaction
                .commit()
                .await
                .map_err(|error| store_error("failed to commit lease transaction", error))?,
            WriteDecision::Reject => {
                debug!(
                    lease_id = %lease_id,
                    intent = candidate.intent.as_str(),
                    "lease conditional write rejected"
                );
                transaction
                    .rollback()
                    .await
                    .map_err(|error| store_error("failed to roll back lease transaction", error))?;
            }
        }

        Ok(decision.into_result(current.as_ref()))
    }

    async fn read_last_known_state(
        &self,
        lease_id: &LeaseId,
        cancellation: &CancellationToken,
    ) -> AppResult<LeaseAcquireResult> {
        let query = sqlx::query_as::<_, LeaseRow>(
            r#"
            SELECT id, token, expires_at, acquired_at, released_at
            FROM leases
            WHERE id = $1
            "#,
        )
        .bind(lease_id.as_str())
        .fetch_optional(&self.pool);

        let row = tokio::select! {
            biased;
            () = cancellation.cancelled() => {
                return Err(AppError::Cancelled(format!(
                    "lease '{lease_id}' state read cancelled"
                )));
            }
            row = query => row.map_err(|error| {
                AppError::Internal(format!("failed to read lease '{lease_id}' state: {error}"))
            })?,
        };

        let current = row.map(LeaseRow::into_lease).transpose()?;
        Ok(LeaseAcquireResult::contended(
            current.as_ref().map(Lease::info).as_ref(),
        ))
    }
}

/// `TIMESTAMPTZ` keeps microseconds; rows are built at that precision so the
/// winner's result matches what competitors later read back.
fn at_column_precision(
    candidate: &LeaseCandidate,
    now: DateTime<Utc>,
) -> (LeaseCandidate, DateTime<Utc>) {
    let mut candidate = candidate.clone();
    let lease = &mut candidate.lease;
    lease.expires = lease.expires.trunc_subsecs(6);
    lease.acquired = lease.acquired.map(|acquired| acquired.trunc_subsecs(6));
    lease.released = lease.released.map(|released| released.trunc_subsecs(6));

    (candidate, now.trunc_subsecs(6))
}

fn store_error(context: &str, error: sqlx::Error) -> AppError {
    let is_transient = matches!(
        &error,
        sqlx::Error::Database(database_error)
            if database_error
                .code()
                .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&&*code))
    );

    if is_transient {
        AppError::TransientConflict(format!("{context}: {error}"))
    } else {
        AppError::Internal(format!("{context}: {error}"))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LeaseRow {
    id: String,
    token: uuid::Uuid,
    expires_at: DateTime<Utc>,
    acquired_at: Option<DateTime<Utc>>,
    released_at: Option<DateTime<Utc>>,
}

impl LeaseRow {
    fn into_lease(self) -> AppResult<Lease> {
        Ok(Lease {
            id: LeaseId::new(self.id)?,
            token: LeaseToken::from_uuid(self.token),
            expires: self.expires_at,
            acquired: self.acquired_at,
            released: self.released_at,
        })
    }
}
