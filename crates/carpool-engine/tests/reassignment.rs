//! Reassignment of waiting groups after dropoffs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use carpool_core::{ConditionalUpdate, Filter, GroupId, MemoryStore, Mutation, VehicleId};
use carpool_engine::lock::SweepLock;
use carpool_engine::prelude::*;
use carpool_test_utils::{
    arrivals, assert_pool_invariants, assert_seated_in, assert_waiting, fast_retry,
    faulty_service, fleet, group, service_over,
};

/// A six-seat vehicle: dropping the five frees room for the waiting six.
#[tokio::test]
async fn dropoff_seats_waiting_group() {
    let store = Arc::new(MemoryStore::new());
    let service = service_over(store.clone());
    service.register_fleet(&fleet(&[(1, 6)])).await.unwrap();

    service.journey(group(1, 5)).await.unwrap();
    assert_eq!(service.journey(group(2, 6)).await.unwrap(), JourneyOutcome::Waiting);

    let outcome = service.dropoff(GroupId::new(1)).await.unwrap();
    assert_eq!(outcome, DropoffOutcome::Freed(VehicleId::new(1)));

    let report = tokio::time::timeout(Duration::from_secs(5), service.sweeps().settled())
        .await
        .expect("sweep within bound")
        .expect("worker running");
    assert_eq!(report.status, SweepStatus::Completed);

    assert_seated_in(&service, GroupId::new(2), VehicleId::new(1)).await;
    assert!(service.list_waiting().await.unwrap().is_empty());
    assert_pool_invariants(store.as_ref()).await;
    service.shutdown().await;
}

/// Four waiting pairs and six freed seats: the first three get them.
#[tokio::test]
async fn sweep_is_fifo_fair() {
    let store = Arc::new(MemoryStore::new());
    let service = service_over(store.clone());
    service.register_fleet(&fleet(&[(1, 6)])).await.unwrap();

    service.journey(group(1, 6)).await.unwrap();
    for g in arrivals(2, &[2, 2, 2, 2]) {
        assert_eq!(service.journey(g).await.unwrap(), JourneyOutcome::Waiting);
    }

    service.dropoff(GroupId::new(1)).await.unwrap();
    let report = service.sweeps().settled().await.unwrap();

    let seated: Vec<u64> = report.seated.iter().map(|(g, _)| g.get()).collect();
    assert_eq!(seated, vec![2, 3, 4]);
    assert_eq!(report.still_waiting, vec![GroupId::new(5)]);
    assert_waiting(&service, GroupId::new(5)).await;
    assert_pool_invariants(store.as_ref()).await;
    service.shutdown().await;
}

#[tokio::test]
async fn dropping_a_waiting_group_does_not_sweep() {
    let service = service_over(Arc::new(MemoryStore::new()));
    service.register_fleet(&fleet(&[(1, 2)])).await.unwrap();
    service.journey(group(1, 2)).await.unwrap();
    service.journey(group(2, 2)).await.unwrap();

    let outcome = service.dropoff(GroupId::new(2)).await.unwrap();
    assert_eq!(outcome, DropoffOutcome::RemovedFromWaiting);
    assert_eq!(service.sweeps().completed(), 0);
    assert_eq!(
        service.locate(GroupId::new(2)).await.unwrap(),
        Located::NotFound
    );
    service.shutdown().await;
}

/// A waiting group dropped off while the sweep is about to seat it is skipped
/// quietly and its seat is not consumed.
#[tokio::test]
async fn group_vanishing_mid_sweep_is_skipped() {
    let (service, store) = faulty_service();
    service.register_fleet(&fleet(&[(1, 4)])).await.unwrap();
    service.journey(group(1, 4)).await.unwrap();
    service.journey(group(2, 2)).await.unwrap();
    service.shutdown().await;
    service.dropoff(GroupId::new(1)).await.unwrap();

    store.before_next_transaction(ConditionalUpdate::new(
        Filter::QueueContaining(GroupId::new(2)),
        Mutation::Withdraw(GroupId::new(2)),
    ));
    let report = service.sweep_now().await;
    assert_eq!(report.status, SweepStatus::Completed);
    assert_eq!(report.vanished, vec![GroupId::new(2)]);
    assert!(report.seated.is_empty());
    assert!(report.failed.is_empty());

    let vehicles = service.list_vehicles().await.unwrap();
    assert_eq!(vehicles[0].seats_available, 4);
    assert_pool_invariants(&store).await;
}

/// A group dropped off and asked for again under the same id while a sweep
/// holds its old entry keeps its new size: the sweep skips the old entry.
#[tokio::test]
async fn rejoin_under_same_id_mid_sweep_keeps_new_size() {
    let (service, store) = faulty_service();
    service.register_fleet(&fleet(&[(1, 4)])).await.unwrap();
    service.journey(group(1, 4)).await.unwrap();
    let original = group(5, 2);
    service.journey(original.clone()).await.unwrap();
    service.shutdown().await;
    service.dropoff(GroupId::new(1)).await.unwrap();

    let rejoined = group(5, 6);
    store.before_next_transaction_run(vec![
        ConditionalUpdate::new(Filter::QueueContaining(original.id), Mutation::Withdraw(original.id)),
        ConditionalUpdate::new(Filter::QueueAdmitting(rejoined.id), Mutation::Admit(rejoined.id)),
        ConditionalUpdate::new(Filter::Queue, Mutation::Enqueue(rejoined.clone())),
    ]);
    let report = service.sweep_now().await;
    assert_eq!(report.vanished, vec![GroupId::new(5)]);
    assert!(report.seated.is_empty());

    assert_waiting(&service, GroupId::new(5)).await;
    assert_eq!(service.list_waiting().await.unwrap(), vec![rejoined]);
    let vehicles = service.list_vehicles().await.unwrap();
    assert_eq!(vehicles[0].seats_available, 4);
    assert!(vehicles[0].occupants.is_empty());
    assert_pool_invariants(&store).await;
}

/// A marker left by a crashed sweeper blocks sweeps until it goes stale.
#[tokio::test]
async fn stale_marker_is_recovered() {
    let store = Arc::new(MemoryStore::new());
    let config = PoolingConfig {
        retry: fast_retry(),
        sweep: SweepConfig {
            stale_after: Duration::from_millis(50),
            queue_depth: 1,
        },
        ..PoolingConfig::default()
    };
    let service = PoolingService::new(store.clone(), config).unwrap();
    service.register_fleet(&fleet(&[(1, 4)])).await.unwrap();
    service.journey(group(1, 4)).await.unwrap();
    service.journey(group(2, 4)).await.unwrap();

    let crashed = SweepLock::new(store.clone(), Duration::from_secs(60));
    std::mem::forget(crashed.try_acquire().await.unwrap().expect("free"));

    service.dropoff(GroupId::new(1)).await.unwrap();
    let report = service.sweeps().settled().await.unwrap();
    assert_eq!(report.status, SweepStatus::Skipped);
    assert_waiting(&service, GroupId::new(2)).await;

    tokio::time::sleep(Duration::from_millis(80)).await;
    let report = service.sweep_now().await;
    assert_eq!(report.status, SweepStatus::Completed);
    assert_seated_in(&service, GroupId::new(2), VehicleId::new(1)).await;
    assert!(!service.status().await.unwrap().sweep_in_progress);
    service.shutdown().await;
}

#[tokio::test]
async fn operator_can_break_a_fresh_marker() {
    let store = Arc::new(MemoryStore::new());
    let service = service_over(store.clone());
    service.register_fleet(&fleet(&[(1, 4)])).await.unwrap();
    service.journey(group(1, 4)).await.unwrap();
    service.journey(group(2, 4)).await.unwrap();

    let crashed = SweepLock::new(store.clone(), Duration::from_secs(60));
    std::mem::forget(crashed.try_acquire().await.unwrap().expect("free"));
    service.dropoff(GroupId::new(1)).await.unwrap();
    service.sweeps().settled().await.unwrap();
    assert_waiting(&service, GroupId::new(2)).await;

    assert!(service.force_break_sweep_lock().await.unwrap());
    let report = service.sweep_now().await;
    assert_eq!(report.seated, vec![(GroupId::new(2), VehicleId::new(1))]);
    service.shutdown().await;
}

#[tokio::test]
async fn waiting_group_lands_in_tightest_freed_vehicle() {
    let store = Arc::new(MemoryStore::new());
    let service = service_over(store.clone());
    service
        .register_fleet(&fleet(&[(1, 6), (2, 3)]))
        .await
        .unwrap();
    service.journey(group(1, 3)).await.unwrap();
    service.journey(group(2, 6)).await.unwrap();
    assert_eq!(service.journey(group(3, 3)).await.unwrap(), JourneyOutcome::Waiting);

    // frees vehicle 2 entirely; vehicle 1 stays full
    service.dropoff(GroupId::new(1)).await.unwrap();
    service.sweeps().settled().await.unwrap();

    assert_seated_in(&service, GroupId::new(3), VehicleId::new(2)).await;
    assert_pool_invariants(store.as_ref()).await;
    service.shutdown().await;
}
