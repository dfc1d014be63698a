//! Behaviour of the shared test doubles.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use carpool_core::prelude::*;
use carpool_test_utils::{
    arrivals, assert_pool_invariants, fleet, Fault, FaultyStore, OpKind, StoreOp,
};

async fn installed(store: &FaultyStore) {
    let mut docs: Vec<Document> = fleet(&[(1, 4)])
        .iter()
        .map(|spec| Vehicle::new(spec.id, spec.capacity).into())
        .collect();
    docs.push(WaitingQueue::new().into());
    store.replace_all(docs).await.expect("install");
}

#[tokio::test]
async fn injected_faults_fire_once_each() {
    let store = FaultyStore::new();
    installed(&store).await;
    store.inject(OpKind::FindAll, Fault::Conflict, 1);
    store.inject(OpKind::FindAll, Fault::Unavailable, 1);

    let first = store.find_all(Filter::Queue, Order::Unordered).await.unwrap_err();
    assert!(first.is_conflict());
    let second = store.find_all(Filter::Queue, Order::Unordered).await.unwrap_err();
    assert!(matches!(second, Error::StoreUnavailable { .. }));
    assert!(store.find_all(Filter::Queue, Order::Unordered).await.is_ok());

    assert_eq!(store.injected_count(), 2);
}

#[tokio::test]
async fn faults_target_only_their_kind() {
    let store = FaultyStore::new();
    installed(&store).await;
    store.inject(OpKind::Transaction, Fault::Unavailable, 3);

    assert!(store.find_all(Filter::AnyVehicle, Order::ById).await.is_ok());
    store.clear_faults();
    let result = store.transaction(Vec::new()).await.expect("txn");
    assert!(result.is_committed());
}

#[tokio::test]
async fn competing_update_lands_before_transaction() {
    let store = FaultyStore::new();
    installed(&store).await;
    let group = arrivals(1, &[2]).remove(0);
    store
        .transaction(vec![
            ConditionalUpdate::new(Filter::QueueAdmitting(group.id), Mutation::Admit(group.id)),
            ConditionalUpdate::new(Filter::Queue, Mutation::Enqueue(group.clone())),
        ])
        .await
        .expect("enqueue");

    store.before_next_transaction(ConditionalUpdate::new(
        Filter::QueueContaining(group.id),
        Mutation::Withdraw(group.id),
    ));
    let result = store
        .transaction(vec![
            ConditionalUpdate::new(Filter::vehicle_for(&group), Mutation::Seat(group.clone())),
            ConditionalUpdate::new(Filter::QueueHolding(group.clone()), Mutation::Dequeue(group.id)),
        ])
        .await
        .expect("txn");

    assert_eq!(result, TxnResult::Aborted { step: 1 });
    assert!(store.operations().contains(&StoreOp::Transaction {
        steps: 2,
        committed: false,
    }));
    assert_pool_invariants(&store).await;
}

#[tokio::test]
async fn operations_are_recorded_in_order() {
    let store = FaultyStore::new();
    installed(&store).await;
    store.clear_operations();

    store.find_all(Filter::AnyVehicle, Order::ById).await.expect("read");
    store
        .conditional_update(ConditionalUpdate::new(Filter::Vehicle(VehicleId::new(9)), Mutation::Unmark))
        .await
        .expect("update");

    let ops = store.operations();
    assert_eq!(ops.len(), 2);
    assert!(matches!(ops[0], StoreOp::FindAll { .. }));
    assert!(matches!(ops[1], StoreOp::ConditionalUpdate { matched: false, .. }));
}

#[tokio::test]
async fn competing_transaction_lands_whole() {
    let store = FaultyStore::new();
    installed(&store).await;
    let group = arrivals(1, &[2]).remove(0);

    store.before_next_transaction_run(vec![
        ConditionalUpdate::new(Filter::QueueAdmitting(group.id), Mutation::Admit(group.id)),
        ConditionalUpdate::new(Filter::Queue, Mutation::Enqueue(group.clone())),
    ]);
    let result = store
        .transaction(vec![ConditionalUpdate::new(
            Filter::QueueAdmitting(group.id),
            Mutation::Admit(group.id),
        )])
        .await
        .expect("txn");

    assert_eq!(result, TxnResult::Aborted { step: 0 });
    let queues = store.find_all(Filter::Queue, Order::Unordered).await.expect("read");
    assert_eq!(queues[0].as_queue().expect("queue").groups, vec![group]);
    assert_pool_invariants(&store).await;
}

#[tokio::test(start_paused = true)]
async fn latency_delays_every_call() {
    let store = FaultyStore::with_latency(std::time::Duration::from_millis(40));
    let started = tokio::time::Instant::now();

    store.find_all(Filter::Queue, Order::Unordered).await.expect("read");
    store.find_all(Filter::AnyVehicle, Order::ById).await.expect("read");

    assert!(started.elapsed() >= std::time::Duration::from_millis(80));
}
