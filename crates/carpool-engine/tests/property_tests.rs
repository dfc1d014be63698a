//! Property-based tests for pool invariants.
//!
//! Random fleets take random sequences of journeys and dropoffs. After every
//! step (and the sweep a dropoff triggers) the pool must be consistent, and no
//! waiting group may fit a vehicle's free seats.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use proptest::prelude::*;
use tokio_test::block_on;

use carpool_core::{GroupId, MemoryStore, VehicleId};
use carpool_engine::prelude::*;
use carpool_test_utils::{assert_pool_invariants, group, service_over};

#[derive(Debug, Clone)]
enum Op {
    Journey { size: u32 },
    Dropoff { pick: usize },
}

fn arb_fleet() -> impl Strategy<Value = Vec<VehicleSpec>> {
    prop::collection::vec(1u32..=6, 0..4).prop_map(|capacities| {
        capacities
            .into_iter()
            .zip(1_u64..)
            .map(|(capacity, id)| VehicleSpec::new(VehicleId::new(id), capacity))
            .collect()
    })
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1u32..=7).prop_map(|size| Op::Journey { size }),
        2 => any::<usize>().prop_map(|pick| Op::Dropoff { pick }),
    ]
}

async fn assert_nothing_waits_needlessly(service: &PoolingService) {
    let max_free = service
        .list_vehicles()
        .await
        .unwrap()
        .iter()
        .map(|v| v.seats_available)
        .max()
        .unwrap_or(0);
    for waiting in service.list_waiting().await.unwrap() {
        assert!(
            waiting.size > max_free,
            "group {} of {} waits although {max_free} seats are free",
            waiting.id,
            waiting.size
        );
    }
}

async fn run_ops(fleet: Vec<VehicleSpec>, ops: Vec<Op>) {
    let store = Arc::new(MemoryStore::new());
    let service = service_over(store.clone());
    service.register_fleet(&fleet).await.unwrap();

    let mut next_id = 1_u64;
    let mut active: Vec<GroupId> = Vec::new();

    for op in ops {
        match op {
            Op::Journey { size } => {
                let id = next_id;
                next_id += 1;
                service.journey(group(id, size)).await.unwrap();
                active.push(GroupId::new(id));
            }
            Op::Dropoff { pick } => {
                if active.is_empty() {
                    let outcome = service.dropoff(GroupId::new(next_id)).await.unwrap();
                    assert_eq!(outcome, DropoffOutcome::NotFound);
                    continue;
                }
                let group_id = active.swap_remove(pick % active.len());
                let outcome = service.dropoff(group_id).await.unwrap();
                assert_ne!(outcome, DropoffOutcome::NotFound);
                service.sweeps().settled().await;
            }
        }

        assert_pool_invariants(store.as_ref()).await;
        assert_nothing_waits_needlessly(&service).await;
    }

    for group_id in &active {
        assert!(service.locate(*group_id).await.unwrap().is_active());
    }
    service.shutdown().await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_random_traffic_keeps_invariants(
        fleet in arb_fleet(),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        block_on(run_ops(fleet, ops));
    }

    #[test]
    fn prop_seated_people_never_exceed_fleet(
        fleet in arb_fleet(),
        sizes in prop::collection::vec(1u32..=6, 1..30),
    ) {
        block_on(async {
            let service = service_over(Arc::new(MemoryStore::new()));
            service.register_fleet(&fleet).await.unwrap();
            for (id, size) in (1_u64..).zip(sizes) {
                service.journey(group(id, size)).await.unwrap();
            }
            let status = service.status().await.unwrap();
            let total: u64 = fleet.iter().map(|v| u64::from(v.capacity)).sum();
            prop_assert_eq!(status.total_seats, total);
            prop_assert!(status.seats_available <= total);
            service.shutdown().await;
            Ok(())
        })?;
    }
}
