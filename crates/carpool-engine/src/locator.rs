//! Read-only group lookup.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use carpool_core::{DocumentStore, Filter, GroupId, Order, VehicleSummary};

use crate::error::Result;

/// Where a group currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Located {
    /// Seated in this vehicle.
    SeatedIn(VehicleSummary),
    /// In the waiting queue.
    Waiting,
    /// No current record.
    NotFound,
}

impl Located {
    /// Returns true if the group is seated or waiting.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

/// Answers "where is this group" without mutating anything.
#[derive(Clone)]
pub struct Locator {
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locator").finish_non_exhaustive()
    }
}

impl Locator {
    /// Creates a locator over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Looks up a group: vehicles first, then the waiting queue.
    ///
    /// A group reassigned between the two reads would otherwise be missed by
    /// both, so a double miss checks the vehicles once more.
    ///
    /// # Errors
    ///
    /// Returns a store error if a read fails.
    pub async fn locate(&self, group_id: GroupId) -> Result<Located> {
        if let Some(found) = self.seated_in(group_id).await? {
            return Ok(found);
        }

        let waiting = self
            .store
            .find_all(Filter::QueueContaining(group_id), Order::Unordered)
            .await?;
        if !waiting.is_empty() {
            return Ok(Located::Waiting);
        }

        Ok(self.seated_in(group_id).await?.unwrap_or(Located::NotFound))
    }

    async fn seated_in(&self, group_id: GroupId) -> Result<Option<Located>> {
        let vehicles = self
            .store
            .find_all(Filter::VehicleContaining(group_id), Order::ById)
            .await?;
        Ok(vehicles
            .iter()
            .find_map(|doc| doc.as_vehicle())
            .map(|v| Located::SeatedIn(v.summary())))
    }
}
