use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use leasewarden_application::{Clock, LeaseCoordinator, LeaseStore};
use leasewarden_core::AppError;
use leasewarden_domain::{LeaseCandidate, LeaseFilter, LeaseId};
use tokio_util::sync::CancellationToken;

use crate::ManualClock;

use super::InMemoryLeaseStore;

fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .unwrap_or_else(|| unreachable!()),
    ))
}

fn sync_job() -> LeaseId {
    LeaseId::new("sync-job").unwrap_or_else(|_| unreachable!())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_workers_racing_for_sync_job_have_one_winner() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let clock = manual_clock();
    let worker_a = LeaseCoordinator::new(store.clone(), clock.clone());
    let worker_b = LeaseCoordinator::new(store.clone(), clock);

    let cancellation = CancellationToken::new();
    let (left, right) = tokio::join!(
        worker_a.try_acquire("sync-job", Duration::from_secs(30), None, &cancellation),
        worker_b.try_acquire("sync-job", Duration::from_secs(30), None, &cancellation),
    );

    let left = left.unwrap_or_else(|_| unreachable!());
    let right = right.unwrap_or_else(|_| unreachable!());
    assert!(left.is_lease_acquired() ^ right.is_lease_acquired());

    let (winner, loser) = if left.is_lease_acquired() {
        (left, right)
    } else {
        (right, left)
    };
    assert_eq!(loser.expires, winner.expires);
    assert_eq!(loser.last_acquired_at, winner.last_acquired_at);

    let row = store
        .find_lease(&sync_job())
        .await
        .unwrap_or_else(|| unreachable!());
    assert_eq!(Some(row.ticket()), winner.ticket);
}

#[tokio::test]
async fn lapsed_lease_can_be_taken_by_another_worker() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let clock = manual_clock();
    let coordinator = LeaseCoordinator::new(store.clone(), clock.clone());
    let cancellation = CancellationToken::new();

    let first = coordinator
        .try_acquire("sync-job", Duration::from_secs(30), None, &cancellation)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(first.is_lease_acquired());

    clock.advance(Duration::from_secs(29));
    let early = coordinator
        .try_acquire("sync-job", Duration::from_secs(30), None, &cancellation)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(!early.is_lease_acquired());

    clock.advance(Duration::from_secs(1));
    let late = coordinator
        .try_acquire("sync-job", Duration::from_secs(30), None, &cancellation)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(late.is_lease_acquired());
    assert_eq!(late.last_released_at, first.expires);
}

#[tokio::test]
async fn released_lease_reports_release_to_filter() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let clock = manual_clock();
    let coordinator = LeaseCoordinator::new(store, clock.clone());
    let cancellation = CancellationToken::new();

    let acquired = coordinator
        .try_acquire("sync-job", Duration::from_secs(60), None, &cancellation)
        .await
        .unwrap_or_else(|_| unreachable!());
    let ticket = acquired.ticket.unwrap_or_else(|| unreachable!());
    let released = coordinator
        .release(&ticket, &cancellation)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(released.is_released);

    let recently = clock.now() - chrono::Duration::seconds(300);
    let throttled = coordinator
        .try_acquire(
            "sync-job",
            Duration::from_secs(60),
            Some(LeaseFilter::not_released_since(recently)),
            &cancellation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(!throttled.is_lease_acquired());

    clock.advance(Duration::from_secs(301));
    let allowed = coordinator
        .try_acquire(
            "sync-job",
            Duration::from_secs(60),
            Some(LeaseFilter::not_released_since(
                clock.now() - chrono::Duration::seconds(300),
            )),
            &cancellation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(allowed.is_lease_acquired());
}

#[tokio::test]
async fn cancelled_write_leaves_row_unchanged() {
    let store = InMemoryLeaseStore::new().with_write_latency(Duration::from_secs(5));
    let clock = manual_clock();
    let cancellation = CancellationToken::new();

    let canceller = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let now = clock.now();
    let candidate = LeaseCandidate::acquire(sync_job(), now, now + chrono::Duration::seconds(30));
    let result = store
        .conditional_write(&candidate, now, None, &cancellation)
        .await;

    assert!(matches!(result, Err(AppError::Cancelled(_))));
    assert!(store.find_lease(&sync_job()).await.is_none());
}

#[tokio::test]
async fn last_known_state_never_carries_ticket() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let coordinator = LeaseCoordinator::new(store.clone(), manual_clock());
    let cancellation = CancellationToken::new();

    let acquired = coordinator
        .try_acquire("sync-job", Duration::from_secs(30), None, &cancellation)
        .await
        .unwrap_or_else(|_| unreachable!());

    let state = store
        .read_last_known_state(&sync_job(), &cancellation)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(state.ticket.is_none());
    assert_eq!(state.expires, acquired.expires);

    let vacant = store
        .read_last_known_state(
            &LeaseId::new("never-used").unwrap_or_else(|_| unreachable!()),
            &cancellation,
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(vacant.expires, None);
}
