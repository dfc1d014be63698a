//! Journey allocation: best fit, else wait.
//!
//! A journey is one transaction that claims the group id on the queue document
//! and seats the group in the vehicle with the fewest free seats that still fits.
//! Only if nothing fits does a second transaction claim the id and enqueue the
//! group. The check and the decrement are never separated, so two concurrent
//! journeys cannot both claim the last seats of a vehicle, nor both be admitted
//! under one id.
//!
//! | Step | Update | Aborts when |
//! |------|--------|-------------|
//! | 0 | claim the id | a seated or waiting group holds it |
//! | 1 | seat in the tightest-fitting vehicle | no vehicle fits |

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use carpool_core::{
    ConditionalUpdate, DocumentStore, Filter, Group, Mutation, Order, TxnResult, VehicleSummary,
};

use crate::error::{Error, Result};
use crate::metrics::PoolingMetrics;
use crate::queue::{admit_update, WaitingList};
use crate::retry::RetryPolicy;
use crate::worker::SweepTrigger;

/// Result of a journey request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JourneyOutcome {
    /// Seated; carries the vehicle and its free seats after seating.
    Seated(VehicleSummary),
    /// No vehicle fits right now; the group is queued.
    Waiting,
}

impl JourneyOutcome {
    /// Metric label for this outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Seated(_) => "seated",
            Self::Waiting => "waiting",
        }
    }
}

/// Update that seats `group` in the tightest-fitting vehicle.
///
/// Shared with the reassignment sweep so both paths pick vehicles identically.
#[must_use]
pub fn seat_update(group: Group) -> ConditionalUpdate {
    ConditionalUpdate::new(Filter::vehicle_for(&group), Mutation::Seat(group))
        .ordered(Order::TightestFit)
}

/// Seats new groups or queues them.
#[derive(Clone)]
pub struct Allocator {
    store: Arc<dyn DocumentStore>,
    waiting: WaitingList,
    trigger: Option<SweepTrigger>,
    retry: RetryPolicy,
    metrics: PoolingMetrics,
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Allocator {
    /// Creates an allocator over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self {
            waiting: WaitingList::new(Arc::clone(&store)),
            store,
            trigger: None,
            retry,
            metrics: PoolingMetrics::new(),
        }
    }

    /// Lets the allocator ask for a sweep when seats were freed while a group
    /// was on its way into the queue.
    #[must_use]
    pub fn with_trigger(mut self, trigger: SweepTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Seats `group` in the best-fitting vehicle, or queues it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidGroup`] if the size is zero
    /// - [`Error::DuplicateGroup`] if the id is already seated or waiting
    /// - [`Error::RetriesExhausted`] if conflicts persisted through every retry
    /// - a store error if the store is unavailable
    pub async fn journey(&self, group: Group) -> Result<JourneyOutcome> {
        if group.size == 0 {
            return Err(Error::InvalidGroup {
                group_id: group.id,
                message: "size must be positive".to_string(),
            });
        }
        let outcome = self
            .retry
            .run("journey", carpool_core::Error::is_conflict, || {
                self.assign(group.clone())
            })
            .await?;

        self.metrics.record_journey(outcome.label());
        match outcome {
            JourneyOutcome::Seated(vehicle) => tracing::debug!(
                vehicle_id = %vehicle.id,
                seats_available = vehicle.seats_available,
                "group seated"
            ),
            JourneyOutcome::Waiting => tracing::debug!("no vehicle fits, group waiting"),
        }
        Ok(outcome)
    }

    async fn assign(&self, group: Group) -> Result<JourneyOutcome> {
        let group_id = group.id;
        let freed_before = self.trigger.as_ref().map(SweepTrigger::requested);

        let steps = vec![admit_update(group_id), seat_update(group.clone())];
        match self.store.transaction(steps).await? {
            TxnResult::Committed(images) => {
                let vehicle = images
                    .into_iter()
                    .last()
                    .ok_or_else(|| carpool_core::Error::internal("committed transaction without images"))?
                    .into_vehicle()?;
                return Ok(JourneyOutcome::Seated(vehicle.summary()));
            }
            TxnResult::Aborted { step: 0 } => return Err(Error::DuplicateGroup { group_id }),
            TxnResult::Aborted { .. } => {}
        }

        if self.waiting.enqueue(group).await?.is_none() {
            return Err(Error::DuplicateGroup { group_id });
        }

        // A dropoff between the seat miss and the enqueue may have swept a queue
        // that did not hold this group yet.
        if let (Some(trigger), Some(before)) = (&self.trigger, freed_before) {
            if trigger.requested() != before {
                let ticket = trigger.request();
                tracing::debug!(ticket, "seats freed while queueing, sweep requested");
            }
        }
        Ok(JourneyOutcome::Waiting)
    }
}
