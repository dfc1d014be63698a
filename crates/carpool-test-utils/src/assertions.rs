//! Invariant assertions over a store.

use std::collections::{BTreeSet, HashMap};

use carpool_core::{DocumentStore, Filter, GroupId, Order, VehicleId};
use carpool_engine::locator::Located;
use carpool_engine::PoolingService;

/// Where a group was found while checking exclusivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Place {
    Vehicle(VehicleId),
    Queue,
}

/// Checks every pool invariant against the current store contents.
///
/// - each vehicle's free seats match its occupants, never exceeding capacity
/// - each group id appears in exactly one place
/// - the waiting queue exists once and is in arrival order
/// - the queue's active ids are exactly the seated and waiting groups
///
/// # Panics
///
/// Panics describing the first violation found.
pub async fn assert_pool_invariants(store: &dyn DocumentStore) {
    let vehicles = store
        .find_all(Filter::AnyVehicle, Order::ById)
        .await
        .expect("read vehicles");
    let queues = store
        .find_all(Filter::Queue, Order::Unordered)
        .await
        .expect("read queue");

    let mut seen: HashMap<GroupId, Place> = HashMap::new();
    let mut claim = |group_id: GroupId, place: Place| {
        if let Some(previous) = seen.insert(group_id, place) {
            panic!("group {group_id} found in {previous:?} and {place:?}");
        }
    };

    for doc in &vehicles {
        let vehicle = doc.as_vehicle().expect("vehicle document");
        assert!(
            vehicle.occupied_seats() <= u64::from(vehicle.capacity),
            "vehicle {} overbooked: {} people in {} seats",
            vehicle.id,
            vehicle.occupied_seats(),
            vehicle.capacity
        );
        assert!(
            vehicle.is_consistent(),
            "vehicle {} reports {} free seats with {} of {} occupied",
            vehicle.id,
            vehicle.seats_available,
            vehicle.occupied_seats(),
            vehicle.capacity
        );
        for group in &vehicle.occupants {
            claim(group.id, Place::Vehicle(vehicle.id));
        }
    }

    assert_eq!(queues.len(), 1, "expected exactly one waiting queue");
    let queue = queues[0].as_queue().expect("queue document");
    assert!(queue.is_sorted(), "waiting queue out of arrival order");
    for group in &queue.groups {
        claim(group.id, Place::Queue);
    }

    let present: BTreeSet<GroupId> = seen.keys().copied().collect();
    assert_eq!(
        queue.active_groups, present,
        "active ids disagree with seated and waiting groups"
    );
}

/// Asserts that `group_id` is seated in `vehicle_id`.
///
/// # Panics
///
/// Panics if the group is elsewhere.
pub async fn assert_seated_in(service: &PoolingService, group_id: GroupId, vehicle_id: VehicleId) {
    match service.locate(group_id).await.expect("locate") {
        Located::SeatedIn(vehicle) => assert_eq!(
            vehicle.id, vehicle_id,
            "group {group_id} seated in {} instead of {vehicle_id}",
            vehicle.id
        ),
        other => panic!("group {group_id} expected in vehicle {vehicle_id}, found {other:?}"),
    }
}

/// Asserts that `group_id` is waiting.
///
/// # Panics
///
/// Panics if the group is not in the waiting queue.
pub async fn assert_waiting(service: &PoolingService, group_id: GroupId) {
    let located = service.locate(group_id).await.expect("locate");
    assert_eq!(located, Located::Waiting, "group {group_id} should be waiting");
}
