//! The engine facade consumed by an API layer.
//!
//! [`PoolingService`] wires every component over one shared store and owns the
//! background sweep worker. It is cheap to clone; all clones share the worker.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use carpool_core::observability::{dropoff_span, journey_span, locate_span};
use carpool_core::{DocumentStore, Group, GroupId, Vehicle};

use crate::allocator::{Allocator, JourneyOutcome};
use crate::config::PoolingConfig;
use crate::coordinator::{Coordinator, DropoffOutcome};
use crate::error::Result;
use crate::fleet::{FleetRegistry, VehicleSpec};
use crate::locator::{Located, Locator};
use crate::lock::SweepLock;
use crate::queue::WaitingList;
use crate::sweep::{SweepReport, Sweeper};
use crate::worker::{SweepHandle, SweepWorker};

/// Summary of the pool at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    /// Registered vehicles.
    pub vehicles: usize,
    /// Seats across the fleet.
    pub total_seats: u64,
    /// Free seats across the fleet.
    pub seats_available: u64,
    /// Groups currently seated.
    pub seated_groups: usize,
    /// Groups currently waiting.
    pub waiting_groups: usize,
    /// Whether a reassignment sweep holds the queue marker.
    pub sweep_in_progress: bool,
}

struct Inner {
    config: PoolingConfig,
    registry: FleetRegistry,
    allocator: Allocator,
    coordinator: Coordinator,
    locator: Locator,
    waiting: WaitingList,
    sweeper: Sweeper,
    sweeps: SweepHandle,
    worker: Mutex<Option<SweepWorker>>,
}

/// Shared-vehicle pooling engine.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use carpool_core::{Group, GroupId, MemoryStore, VehicleId};
/// use carpool_engine::prelude::*;
///
/// # tokio_test::block_on(async {
/// let service = PoolingService::new(Arc::new(MemoryStore::new()), PoolingConfig::default())?;
/// service
///     .register_fleet(&[VehicleSpec::new(VehicleId::new(1), 4)])
///     .await?;
///
/// let outcome = service.journey(Group::new(GroupId::new(1), 3)).await?;
/// assert!(matches!(outcome, JourneyOutcome::Seated(_)));
///
/// service.shutdown().await;
/// # Ok::<(), carpool_engine::Error>(())
/// # }).unwrap();
/// ```
#[derive(Clone)]
pub struct PoolingService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PoolingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolingService")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl PoolingService {
    /// Builds the engine over `store` and spawns its sweep worker.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(store: Arc<dyn DocumentStore>, config: PoolingConfig) -> Result<Self> {
        config.validate()?;

        let lock = SweepLock::new(Arc::clone(&store), config.sweep.stale_after);
        let sweeper = Sweeper::new(Arc::clone(&store), lock, config.retry);
        let worker = SweepWorker::spawn(sweeper.clone(), config.sweep.queue_depth);

        let inner = Inner {
            registry: FleetRegistry::new(Arc::clone(&store)),
            allocator: Allocator::new(Arc::clone(&store), config.retry)
                .with_trigger(worker.trigger()),
            coordinator: Coordinator::new(Arc::clone(&store), worker.trigger(), config.retry),
            locator: Locator::new(Arc::clone(&store)),
            waiting: WaitingList::new(store),
            sweeps: worker.handle(),
            sweeper,
            worker: Mutex::new(Some(worker)),
            config,
        };

        tracing::debug!(holder = %inner.sweeper.lock().holder_id(), "pooling service started");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &PoolingConfig {
        &self.inner.config
    }

    /// Replaces the fleet, discarding every assignment and waiting group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFleet`](crate::Error::InvalidFleet) for a malformed
    /// definition, or a store error.
    pub async fn register_fleet(&self, vehicles: &[VehicleSpec]) -> Result<()> {
        self.inner.registry.register_fleet(vehicles).await
    }

    /// Seats a new group in the best-fitting vehicle, or queues it.
    ///
    /// # Errors
    ///
    /// See [`Allocator::journey`].
    pub async fn journey(&self, group: Group) -> Result<JourneyOutcome> {
        let span = journey_span(&group);
        let outcome = self.inner.allocator.journey(group).instrument(span.clone()).await?;
        span.record("outcome", outcome.label());
        if let JourneyOutcome::Seated(vehicle) = outcome {
            span.record("vehicle_id", vehicle.id.get());
        }
        Ok(outcome)
    }

    /// Removes a group and, if seats were freed, requests a reassignment sweep.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::dropoff`].
    pub async fn dropoff(&self, group_id: GroupId) -> Result<DropoffOutcome> {
        let span = dropoff_span(group_id);
        let outcome = self
            .inner
            .coordinator
            .dropoff(group_id)
            .instrument(span.clone())
            .await?;
        span.record("outcome", outcome.label());
        Ok(outcome)
    }

    /// Reports where a group is.
    ///
    /// # Errors
    ///
    /// Returns a store error if a read fails.
    pub async fn locate(&self, group_id: GroupId) -> Result<Located> {
        self.inner
            .locator
            .locate(group_id)
            .instrument(locate_span(group_id))
            .await
    }

    /// Returns every vehicle ordered by id.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub async fn list_vehicles(&self) -> Result<Vec<Vehicle>> {
        self.inner.registry.list_vehicles().await
    }

    /// Returns the waiting groups in arrival order.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub async fn list_waiting(&self) -> Result<Vec<Group>> {
        self.inner.waiting.groups().await
    }

    /// Summarises the pool.
    ///
    /// The vehicle and queue reads are separate, so counts taken during heavy
    /// traffic may not add up exactly.
    ///
    /// # Errors
    ///
    /// Returns a store error if a read fails.
    pub async fn status(&self) -> Result<PoolStatus> {
        let vehicles = self.inner.registry.list_vehicles().await?;
        let queue = self.inner.waiting.snapshot().await?;

        Ok(PoolStatus {
            vehicles: vehicles.len(),
            total_seats: vehicles.iter().map(|v| u64::from(v.capacity)).sum(),
            seats_available: vehicles.iter().map(|v| u64::from(v.seats_available)).sum(),
            seated_groups: vehicles.iter().map(|v| v.occupants.len()).sum(),
            waiting_groups: queue.groups.len(),
            sweep_in_progress: queue.reassigning_since.is_some(),
        })
    }

    /// Runs a sweep on the calling task and returns its report.
    ///
    /// Shares the queue marker with the background worker, so it is skipped if a
    /// sweep is already in flight.
    pub async fn sweep_now(&self) -> SweepReport {
        self.inner.sweeper.sweep().await
    }

    /// Clears a sweep marker left behind by a crashed process.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn force_break_sweep_lock(&self) -> Result<bool> {
        self.inner.sweeper.lock().force_break().await
    }

    /// Returns a handle for observing background sweeps.
    #[must_use]
    pub fn sweeps(&self) -> SweepHandle {
        self.inner.sweeps.clone()
    }

    /// Stops the background worker after its current sweep.
    ///
    /// Later dropoffs still succeed but no longer trigger sweeps. Calling this
    /// more than once is harmless.
    pub async fn shutdown(&self) {
        let worker = match self.inner.worker.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            worker.shutdown().await;
            tracing::debug!("pooling service stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carpool_core::{MemoryStore, VehicleId};

    fn service() -> PoolingService {
        PoolingService::new(Arc::new(MemoryStore::new()), PoolingConfig::default())
            .expect("service")
    }

    fn spec(id: u64, capacity: u32) -> VehicleSpec {
        VehicleSpec::new(VehicleId::new(id), capacity)
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let mut config = PoolingConfig::default();
        config.sweep.queue_depth = 0;
        let err = PoolingService::new(Arc::new(MemoryStore::new()), config).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[tokio::test]
    async fn status_counts_seats_and_groups() {
        let service = service();
        service
            .register_fleet(&[spec(1, 4), spec(2, 6)])
            .await
            .expect("fleet");
        service.journey(Group::new(GroupId::new(1), 3)).await.expect("seat");
        service.journey(Group::new(GroupId::new(2), 9)).await.expect("wait");

        let status = service.status().await.expect("status");
        assert_eq!(
            status,
            PoolStatus {
                vehicles: 2,
                total_seats: 10,
                seats_available: 7,
                seated_groups: 1,
                waiting_groups: 1,
                sweep_in_progress: false,
            }
        );
        service.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_dropoff_still_works() {
        let service = service();
        service.register_fleet(&[spec(1, 4)]).await.expect("fleet");
        service.journey(Group::new(GroupId::new(1), 2)).await.expect("seat");

        service.shutdown().await;
        service.shutdown().await;

        let outcome = service.dropoff(GroupId::new(1)).await.expect("dropoff");
        assert_eq!(outcome, DropoffOutcome::Freed(VehicleId::new(1)));
    }

    #[tokio::test]
    async fn sweep_now_seats_waiting_groups() {
        let service = service();
        service.register_fleet(&[spec(1, 4)]).await.expect("fleet");
        service.shutdown().await;

        service.journey(Group::new(GroupId::new(1), 4)).await.expect("seat");
        service.journey(Group::new(GroupId::new(2), 4)).await.expect("wait");
        service.dropoff(GroupId::new(1)).await.expect("dropoff");

        assert_eq!(
            service.locate(GroupId::new(2)).await.expect("locate"),
            Located::Waiting
        );
        let report = service.sweep_now().await;
        assert_eq!(report.seated, vec![(GroupId::new(2), VehicleId::new(1))]);
        assert!(service.locate(GroupId::new(2)).await.expect("locate").is_active());
    }

    #[tokio::test]
    async fn force_break_clears_marker_reported_by_status() {
        let store = Arc::new(MemoryStore::new());
        let service =
            PoolingService::new(store.clone(), PoolingConfig::default()).expect("service");
        let other = SweepLock::new(store, std::time::Duration::from_secs(60));
        let guard = other.try_acquire().await.expect("acquire").expect("free");
        std::mem::forget(guard);

        assert!(service.status().await.expect("status").sweep_in_progress);
        assert!(service.force_break_sweep_lock().await.expect("break"));
        assert!(!service.status().await.expect("status").sweep_in_progress);
        service.shutdown().await;
    }
}
