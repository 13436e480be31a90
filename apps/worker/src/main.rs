//! Leasewarden external-sync worker runtime.
//!
//! Every replica ticks on the same interval; the lease guarantees that only
//! one of them runs the sync per tick.

#![forbid(unsafe_code)]

mod worker_config;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use leasewarden_application::{Clock, ExclusiveRunOutcome, LeaseCoordinator, LeaseStore};
use leasewarden_core::{AppError, AppResult};
use leasewarden_domain::{LeaseFilter, LeaseTicket};
use leasewarden_infrastructure::{
    InMemoryLeaseStore, PostgresLeaseStore, RedisLeaseStore, SystemClock,
};
use reqwest::header;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use worker_config::{LeaseStoreBackend, WorkerConfig};

#[derive(Debug, Serialize)]
struct SyncRequest<'a> {
    worker_id: &'a str,
    lease_id: &'a str,
    lease_token: String,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let store = build_lease_store(&config.backend).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let coordinator = LeaseCoordinator::new(store, clock.clone());
    let http_client = reqwest::Client::builder()
        .timeout(config.lease_duration)
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;

    let cancellation = CancellationToken::new();
    spawn_shutdown_listener(cancellation.clone());

    info!(
        worker_id = %config.worker_id,
        lease_id = %config.lease_id,
        lease_seconds = config.lease_duration.as_secs(),
        interval_ms = u64::try_from(config.interval.as_millis()).unwrap_or(u64::MAX),
        "leasewarden-worker started"
    );

    loop {
        let filter = config
            .min_interval
            .map(|min_interval| throttle_filter(clock.now(), min_interval));

        let outcome = coordinator
            .run_exclusive(
                config.lease_id.as_str(),
                config.lease_duration,
                filter,
                &cancellation,
                |ticket| run_sync(&http_client, &config, ticket),
            )
            .await;

        match outcome {
            Ok(ExclusiveRunOutcome::Completed { release, .. }) => {
                info!(
                    worker_id = %config.worker_id,
                    lease_id = %config.lease_id,
                    released = release.is_released,
                    "external sync completed"
                );
            }
            Ok(ExclusiveRunOutcome::LeaseLost { .. }) => {
                warn!(
                    worker_id = %config.worker_id,
                    lease_id = %config.lease_id,
                    "external sync abandoned, lease could not be renewed"
                );
            }
            Ok(ExclusiveRunOutcome::Skipped(result)) => {
                info!(
                    worker_id = %config.worker_id,
                    lease_id = %config.lease_id,
                    held_until = ?result.expires,
                    last_released_at = ?result.last_released_at,
                    "external sync skipped, lease unavailable"
                );
            }
            Err(AppError::Cancelled(_)) => break,
            Err(error) => {
                warn!(
                    worker_id = %config.worker_id,
                    lease_id = %config.lease_id,
                    error = %error,
                    "external sync tick failed"
                );
            }
        }

        tokio::select! {
            () = cancellation.cancelled() => break,
            () = tokio::time::sleep(config.interval) => {}
        }
    }

    info!(worker_id = %config.worker_id, "leasewarden-worker stopped");
    Ok(())
}

/// Accepts the lease only if it was not released within `min_interval` of `now`.
fn throttle_filter(now: DateTime<Utc>, min_interval: Duration) -> LeaseFilter {
    let cutoff = chrono::Duration::from_std(min_interval)
        .ok()
        .and_then(|min_interval| now.checked_sub_signed(min_interval))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    LeaseFilter::not_released_since(cutoff)
}

async fn build_lease_store(backend: &LeaseStoreBackend) -> AppResult<Arc<dyn LeaseStore>> {
    match backend {
        LeaseStoreBackend::Postgres { database_url } => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to connect to database: {error}"))
                })?;

            sqlx::migrate!("../../crates/infrastructure/migrations")
                .run(&pool)
                .await
                .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

            Ok(Arc::new(PostgresLeaseStore::new(pool)))
        }
        LeaseStoreBackend::Redis {
            redis_url,
            key_prefix,
        } => {
            let client = redis::Client::open(redis_url.as_str()).map_err(|error| {
                AppError::Validation(format!("invalid REDIS_URL value: {error}"))
            })?;
            Ok(Arc::new(RedisLeaseStore::new(client, key_prefix.clone())))
        }
        LeaseStoreBackend::Memory => {
            warn!("in-memory lease store only coordinates tasks inside this process");
            Ok(Arc::new(InMemoryLeaseStore::new()))
        }
    }
}

async fn run_sync(
    http_client: &reqwest::Client,
    config: &WorkerConfig,
    ticket: LeaseTicket,
) -> AppResult<()> {
    let mut request = http_client
        .post(config.sync_endpoint_url.as_str())
        .header("x-leasewarden-worker-id", config.worker_id.as_str())
        .json(&SyncRequest {
            worker_id: config.worker_id.as_str(),
            lease_id: ticket.lease_id.as_str(),
            lease_token: ticket.token.to_string(),
        });

    if let Some(secret) = config.sync_shared_secret.as_deref() {
        request = request.header(header::AUTHORIZATION, format!("Bearer {secret}"));
    }

    let response = request.send().await.map_err(|error| {
        AppError::Internal(format!("failed to call sync endpoint: {error}"))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_owned());
        return Err(AppError::Internal(format!(
            "sync endpoint returned status {}: {body}",
            status.as_u16()
        )));
    }

    Ok(())
}

fn spawn_shutdown_listener(cancellation: CancellationToken) {
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(error = %error, "failed to listen for shutdown signal");
            return;
        }

        info!("shutdown requested");
        cancellation.cancel();
    });
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use leasewarden_domain::{LeaseId, LeaseInfo};

    use super::throttle_filter;

    fn released_at(released: DateTime<Utc>) -> LeaseInfo {
        let lease_id = LeaseId::new("external-sync").unwrap_or_else(|_| unreachable!());
        let mut info = LeaseInfo::vacant(lease_id);
        info.released = Some(released);
        info
    }

    #[test]
    fn throttle_filter_declines_recent_release() {
        let now = Utc::now();
        let filter = throttle_filter(now, Duration::from_secs(600));

        assert!(!filter.accepts(&released_at(now - chrono::Duration::seconds(60))));
        assert!(filter.accepts(&released_at(now - chrono::Duration::seconds(3_600))));
    }

    #[test]
    fn throttle_filter_saturates_for_huge_interval() {
        let now = Utc::now();
        let filter = throttle_filter(now, Duration::from_secs(u64::MAX / 2));

        assert!(!filter.accepts(&released_at(now - chrono::Duration::days(365))));
    }
}
