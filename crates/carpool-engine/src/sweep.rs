//! Reassignment sweep.
//!
//! One sweep walks a snapshot of the waiting queue in arrival order and tries to
//! seat each group, strictly one after another. Seating a waiting group touches
//! two documents (the vehicle and the queue), so it runs as a transaction:
//!
//! | Step | Update | Aborts when |
//! |------|--------|-------------|
//! | 0 | seat in the tightest-fitting vehicle | no vehicle fits |
//! | 1 | remove exactly the snapshotted entry from the queue | the entry left the queue meanwhile |
//!
//! An abort at step 1 is the expected race with a concurrent dropoff of the same
//! group; the seat taken at step 0 is rolled back with the transaction. Step 1
//! matches the entry by id, size and arrival, so a group that left and rejoined
//! under the same id with another size is never seated with the stale size.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use carpool_core::observability::sweep_span;
use carpool_core::{DocumentStore, Group, GroupId, TxnResult, VehicleId};
use tracing::Instrument;

use crate::allocator::seat_update;
use crate::error::Result;
use crate::lock::SweepLock;
use crate::metrics::PoolingMetrics;
use crate::queue::{dequeue_update, WaitingList};
use crate::retry::RetryPolicy;

/// How a sweep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    /// Every group in the snapshot was attempted.
    Completed,
    /// Another sweep held the marker; nothing was attempted.
    Skipped,
    /// The queue could not be read or the lock could not be taken.
    Failed,
}

impl SweepStatus {
    /// Metric label for this status.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Sweep sequence number within this process, starting at 1.
    pub sweep: u64,
    /// How the sweep ended.
    pub status: SweepStatus,
    /// Groups seated, with the vehicle each landed in, in seating order.
    pub seated: Vec<(GroupId, VehicleId)>,
    /// Groups attempted that still did not fit.
    pub still_waiting: Vec<GroupId>,
    /// Groups that left the queue before they could be seated.
    pub vanished: Vec<GroupId>,
    /// Groups abandoned after transient store failures.
    pub failed: Vec<GroupId>,
}

impl SweepReport {
    fn new(sweep: u64, status: SweepStatus) -> Self {
        Self {
            sweep,
            status,
            seated: Vec::new(),
            still_waiting: Vec::new(),
            vanished: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Outcome for a single waiting group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reassignment {
    Seated(VehicleId),
    NoCapacity,
    Vanished,
}

impl Reassignment {
    const fn label(self) -> &'static str {
        match self {
            Self::Seated(_) => "seated",
            Self::NoCapacity => "no_capacity",
            Self::Vanished => "vanished",
        }
    }
}

/// Runs reassignment sweeps.
#[derive(Clone)]
pub struct Sweeper {
    store: Arc<dyn DocumentStore>,
    waiting: WaitingList,
    lock: SweepLock,
    retry: RetryPolicy,
    metrics: PoolingMetrics,
    sequence: Arc<AtomicU64>,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("lock", &self.lock)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Sweeper {
    /// Creates a sweeper.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, lock: SweepLock, retry: RetryPolicy) -> Self {
        Self {
            waiting: WaitingList::new(Arc::clone(&store)),
            store,
            lock,
            retry,
            metrics: PoolingMetrics::new(),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the sweep lock.
    #[must_use]
    pub const fn lock(&self) -> &SweepLock {
        &self.lock
    }

    /// Runs one sweep.
    ///
    /// Never fails: store problems end up in the report as a
    /// [`SweepStatus::Failed`] sweep or as failed groups.
    pub async fn sweep(&self) -> SweepReport {
        let sweep = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();

        let span = sweep_span(sweep, self.lock.holder_id());
        let report = self.run(sweep).instrument(span.clone()).await;
        span.record("seated", report.seated.len());
        span.record("still_waiting", report.still_waiting.len());

        self.metrics.record_sweep(report.status.label(), started.elapsed());
        report
    }

    async fn run(&self, sweep: u64) -> SweepReport {
        let guard = match self.lock.try_acquire().await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::debug!("another sweep holds the marker, skipping");
                return SweepReport::new(sweep, SweepStatus::Skipped);
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not take sweep marker");
                return SweepReport::new(sweep, SweepStatus::Failed);
            }
        };

        let report = match self.waiting.groups().await {
            Ok(groups) => self.reassign_all(sweep, groups).await,
            Err(err) => {
                tracing::warn!(error = %err, "could not read waiting queue");
                SweepReport::new(sweep, SweepStatus::Failed)
            }
        };

        if let Err(err) = guard.release().await {
            tracing::warn!(error = %err, "could not release sweep marker; it will age out");
        }
        report
    }

    async fn reassign_all(&self, sweep: u64, groups: Vec<Group>) -> SweepReport {
        let mut report = SweepReport::new(sweep, SweepStatus::Completed);

        for group in groups {
            let group_id = group.id;
            let result = self
                .retry
                .run("reassign", carpool_core::Error::is_transient, || {
                    self.reassign_one(group.clone())
                })
                .await;

            match result {
                Ok(outcome) => {
                    self.metrics.record_reassignment(outcome.label());
                    match outcome {
                        Reassignment::Seated(vehicle_id) => {
                            tracing::info!(%group_id, %vehicle_id, "waiting group seated");
                            report.seated.push((group_id, vehicle_id));
                        }
                        Reassignment::NoCapacity => report.still_waiting.push(group_id),
                        Reassignment::Vanished => {
                            tracing::debug!(%group_id, "group left the queue before seating");
                            report.vanished.push(group_id);
                        }
                    }
                }
                Err(err) => {
                    self.metrics.record_reassignment("failed");
                    tracing::warn!(%group_id, error = %err, "reassignment abandoned for this sweep");
                    report.failed.push(group_id);
                }
            }
        }

        self.metrics
            .set_waiting_groups(report.still_waiting.len() + report.failed.len());
        report
    }

    async fn reassign_one(&self, group: Group) -> Result<Reassignment> {
        let dequeue = dequeue_update(&group);
        let result = self
            .store
            .transaction(vec![seat_update(group), dequeue])
            .await?;

        Ok(match result {
            TxnResult::Committed(images) => {
                let vehicle = images
                    .into_iter()
                    .next()
                    .ok_or_else(|| carpool_core::Error::internal("committed transaction without images"))?
                    .into_vehicle()?;
                Reassignment::Seated(vehicle.id)
            }
            TxnResult::Aborted { step: 0 } => Reassignment::NoCapacity,
            TxnResult::Aborted { .. } => Reassignment::Vanished,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carpool_core::{
        ConditionalUpdate, Document, Filter, MemoryStore, Mutation, Order, Vehicle, WaitingQueue,
    };
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn group(id: u64, size: u32) -> Group {
        let at = Utc.timestamp_opt(1_700_000_000 + i64::try_from(id).unwrap(), 0).unwrap();
        Group::arrived(GroupId::new(id), size, at)
    }

    async fn setup(vehicles: &[(u64, u32)], waiting: &[(u64, u32)]) -> (Sweeper, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut queue = WaitingQueue::new();
        for &(id, size) in waiting {
            queue.insert(group(id, size));
        }
        let mut docs: Vec<Document> = vehicles
            .iter()
            .map(|&(id, seats)| Vehicle::new(VehicleId::new(id), seats).into())
            .collect();
        docs.push(queue.into());
        store.replace_all(docs).await.expect("fleet");

        let lock = SweepLock::new(store.clone(), Duration::from_secs(10));
        (Sweeper::new(store.clone(), lock, RetryPolicy::no_retry()), store)
    }

    #[tokio::test]
    async fn seats_waiting_groups_in_arrival_order() {
        let (sweeper, _) = setup(&[(1, 6)], &[(1, 2), (2, 2), (3, 2), (4, 2)]).await;

        let report = sweeper.sweep().await;
        assert_eq!(report.status, SweepStatus::Completed);
        assert_eq!(report.sweep, 1);
        let seated: Vec<u64> = report.seated.iter().map(|(g, _)| g.get()).collect();
        assert_eq!(seated, vec![1, 2, 3]);
        assert_eq!(report.still_waiting, vec![GroupId::new(4)]);
    }

    #[tokio::test]
    async fn later_small_group_may_use_capacity_an_earlier_large_one_cannot() {
        let (sweeper, _) = setup(&[(1, 3)], &[(1, 5), (2, 3)]).await;

        let report = sweeper.sweep().await;
        assert_eq!(report.still_waiting, vec![GroupId::new(1)]);
        assert_eq!(report.seated, vec![(GroupId::new(2), VehicleId::new(1))]);
    }

    #[tokio::test]
    async fn skips_while_marker_is_held() {
        let (sweeper, store) = setup(&[(1, 6)], &[(1, 2)]).await;
        let other = SweepLock::new(store.clone(), Duration::from_secs(10));
        let guard = other.try_acquire().await.expect("acquire").expect("free");

        let report = sweeper.sweep().await;
        assert_eq!(report.status, SweepStatus::Skipped);
        assert!(report.seated.is_empty());

        guard.release().await.expect("release");
        let report = sweeper.sweep().await;
        assert_eq!(report.sweep, 2);
        assert_eq!(report.seated.len(), 1);
    }

    #[tokio::test]
    async fn releases_marker_after_sweep() {
        let (sweeper, _) = setup(&[(1, 2)], &[(1, 2)]).await;
        sweeper.sweep().await;
        assert!(!sweeper.lock().is_held().await.expect("held"));
    }

    #[tokio::test]
    async fn vanished_group_rolls_back_its_seat() {
        let (sweeper, store) = setup(&[(1, 4)], &[]).await;
        let ghost = group(9, 2);

        let outcome = sweeper.reassign_one(ghost).await.expect("reassign");
        assert_eq!(outcome, Reassignment::Vanished);

        let vehicles = store.find_all(Filter::AnyVehicle, Order::ById).await.expect("read");
        assert_eq!(vehicles[0].as_vehicle().expect("vehicle").seats_available, 4);
    }

    #[tokio::test]
    async fn rejoined_group_is_not_seated_with_its_old_size() {
        let (sweeper, store) = setup(&[(1, 2)], &[(5, 6)]).await;
        let stale = group(5, 2);

        let outcome = sweeper.reassign_one(stale).await.expect("reassign");
        assert_eq!(outcome, Reassignment::Vanished);

        let vehicles = store.find_all(Filter::AnyVehicle, Order::ById).await.expect("read");
        let vehicle = vehicles[0].as_vehicle().expect("vehicle");
        assert_eq!(vehicle.seats_available, 2);
        assert!(vehicle.occupants.is_empty());

        let queues = store.find_all(Filter::Queue, Order::Unordered).await.expect("read");
        assert_eq!(queues[0].as_queue().expect("queue").groups, vec![group(5, 6)]);
    }

    #[tokio::test]
    async fn seated_group_leaves_queue() {
        let (sweeper, store) = setup(&[(1, 4)], &[(1, 4)]).await;
        sweeper.sweep().await;

        let moved = store
            .conditional_update(ConditionalUpdate::new(
                Filter::QueueContaining(GroupId::new(1)),
                Mutation::Unmark,
            ))
            .await
            .expect("update");
        assert!(moved.is_none(), "group must no longer be waiting");
    }
}
