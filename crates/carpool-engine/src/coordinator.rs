//! Dropoff and reassignment triggering.
//!
//! A waiting group is withdrawn from the queue, which releases its id in the same
//! step. A seated group leaves its vehicle in a transaction that also releases
//! its id, so the id can be reused only once the seats are back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use carpool_core::{
    ConditionalUpdate, DocumentStore, Filter, GroupId, Mutation, TxnResult, VehicleId,
};

use crate::error::Result;
use crate::metrics::PoolingMetrics;
use crate::queue::{retire_update, withdraw_update};
use crate::retry::RetryPolicy;
use crate::worker::SweepTrigger;

/// Result of a dropoff request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "vehicleId", rename_all = "snake_case")]
pub enum DropoffOutcome {
    /// The group left this vehicle; its seats are free again.
    Freed(VehicleId),
    /// The group was waiting and has been removed from the queue.
    RemovedFromWaiting,
    /// No seated or waiting group has this id.
    NotFound,
}

impl DropoffOutcome {
    /// Metric label for this outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Freed(_) => "freed",
            Self::RemovedFromWaiting => "removed_from_waiting",
            Self::NotFound => "not_found",
        }
    }
}

/// Handles dropoffs and asks for a sweep whenever seats are freed.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn DocumentStore>,
    trigger: SweepTrigger,
    retry: RetryPolicy,
    metrics: PoolingMetrics,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Creates a coordinator that signals `trigger` after freeing seats.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, trigger: SweepTrigger, retry: RetryPolicy) -> Self {
        Self {
            store,
            trigger,
            retry,
            metrics: PoolingMetrics::new(),
        }
    }

    /// Removes a group from wherever it is.
    ///
    /// The waiting queue is checked first, then the vehicles. The sweep that a
    /// freed seat requests runs in the background; this call does not wait for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetriesExhausted`](crate::Error::RetriesExhausted) if
    /// conflicts persisted, or a store error if the store is unavailable.
    pub async fn dropoff(&self, group_id: GroupId) -> Result<DropoffOutcome> {
        let outcome = self
            .retry
            .run("dropoff", carpool_core::Error::is_conflict, || {
                self.remove(group_id)
            })
            .await?;

        self.metrics.record_dropoff(outcome.label());
        match outcome {
            DropoffOutcome::Freed(vehicle_id) => {
                let ticket = self.trigger.request();
                tracing::debug!(%vehicle_id, ticket, "seats freed, sweep requested");
            }
            DropoffOutcome::RemovedFromWaiting => tracing::debug!("removed from waiting queue"),
            DropoffOutcome::NotFound => tracing::debug!("unknown group"),
        }
        Ok(outcome)
    }

    async fn remove(&self, group_id: GroupId) -> Result<DropoffOutcome> {
        if self
            .store
            .conditional_update(withdraw_update(group_id))
            .await?
            .is_some()
        {
            return Ok(DropoffOutcome::RemovedFromWaiting);
        }

        let steps = vec![
            ConditionalUpdate::new(Filter::VehicleContaining(group_id), Mutation::Unseat(group_id)),
            retire_update(group_id),
        ];
        match self.store.transaction(steps).await? {
            TxnResult::Committed(images) => {
                let vehicle = images
                    .into_iter()
                    .next()
                    .ok_or_else(|| carpool_core::Error::internal("committed transaction without images"))?
                    .into_vehicle()?;
                Ok(DropoffOutcome::Freed(vehicle.id))
            }
            TxnResult::Aborted { step: 0 } => Ok(DropoffOutcome::NotFound),
            TxnResult::Aborted { .. } => {
                Err(carpool_core::Error::internal("waiting queue document missing").into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::SweepLock;
    use crate::sweep::Sweeper;
    use crate::worker::SweepWorker;
    use carpool_core::{Document, Group, MemoryStore, Order, Vehicle, WaitingQueue};
    use std::time::Duration;

    async fn setup() -> (Coordinator, SweepWorker, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut vehicle = Vehicle::new(VehicleId::new(1), 6);
        vehicle.seats_available = 1;
        vehicle.occupants.push(Group::new(GroupId::new(1), 5));
        let mut queue = WaitingQueue::new();
        queue.insert(Group::new(GroupId::new(2), 6));
        queue.active_groups.extend([GroupId::new(1), GroupId::new(2)]);
        let docs: Vec<Document> = vec![vehicle.into(), queue.into()];
        store.replace_all(docs).await.expect("fleet");

        let lock = SweepLock::new(store.clone(), Duration::from_secs(10));
        let worker = SweepWorker::spawn(
            Sweeper::new(store.clone(), lock, RetryPolicy::no_retry()),
            1,
        );
        let coordinator = Coordinator::new(store.clone(), worker.trigger(), RetryPolicy::no_retry());
        (coordinator, worker, store)
    }

    #[tokio::test]
    async fn dropoff_of_waiting_group_removes_it() {
        let (coordinator, worker, _) = setup().await;
        let outcome = coordinator.dropoff(GroupId::new(2)).await.expect("dropoff");
        assert_eq!(outcome, DropoffOutcome::RemovedFromWaiting);
        assert_eq!(worker.handle().completed(), 0);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn dropoff_of_seated_group_frees_and_reassigns() {
        let (coordinator, worker, store) = setup().await;
        let outcome = coordinator.dropoff(GroupId::new(1)).await.expect("dropoff");
        assert_eq!(outcome, DropoffOutcome::Freed(VehicleId::new(1)));

        let report = worker.handle().settled().await.expect("sweep ran");
        assert_eq!(report.seated, vec![(GroupId::new(2), VehicleId::new(1))]);

        let vehicles = store.find_all(Filter::AnyVehicle, Order::ById).await.expect("read");
        let vehicle = vehicles[0].as_vehicle().expect("vehicle");
        assert_eq!(vehicle.seats_available, 0);
        assert!(vehicle.contains(GroupId::new(2)));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn dropoff_releases_the_id() {
        let (coordinator, worker, store) = setup().await;
        coordinator.dropoff(GroupId::new(2)).await.expect("waiting");
        coordinator.dropoff(GroupId::new(1)).await.expect("seated");
        worker.handle().settled().await;

        let queues = store.find_all(Filter::Queue, Order::Unordered).await.expect("read");
        let queue = queues[0].as_queue().expect("queue");
        assert!(queue.active_groups.is_empty());
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn dropoff_of_unknown_group_is_not_found() {
        let (coordinator, worker, _) = setup().await;
        let outcome = coordinator.dropoff(GroupId::new(42)).await.expect("dropoff");
        assert_eq!(outcome, DropoffOutcome::NotFound);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn second_dropoff_is_not_found() {
        let (coordinator, worker, _) = setup().await;
        coordinator.dropoff(GroupId::new(2)).await.expect("first");
        let outcome = coordinator.dropoff(GroupId::new(2)).await.expect("second");
        assert_eq!(outcome, DropoffOutcome::NotFound);
        worker.shutdown().await;
    }
}
