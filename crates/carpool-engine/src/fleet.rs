//! Fleet registration.
//!
//! Registering a fleet is a wholesale reset: every vehicle, every seated group and
//! the whole waiting queue are replaced in a single `replace_all`, so a concurrent
//! reader sees either the old world or the new one.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use carpool_core::{Document, DocumentStore, Filter, Order, Vehicle, VehicleId, WaitingQueue};

use crate::error::{Error, Result};

/// A vehicle as described by the caller registering a fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSpec {
    /// Vehicle identifier, unique within the fleet.
    pub id: VehicleId,
    /// Number of seats; must be positive.
    #[serde(alias = "seats")]
    pub capacity: u32,
}

impl VehicleSpec {
    /// Creates a spec.
    #[must_use]
    pub const fn new(id: VehicleId, capacity: u32) -> Self {
        Self { id, capacity }
    }
}

/// Checks a fleet definition without touching the store.
///
/// # Errors
///
/// Returns [`Error::InvalidFleet`] for a zero capacity or a repeated id.
pub fn validate_fleet(specs: &[VehicleSpec]) -> Result<()> {
    let mut seen = HashSet::with_capacity(specs.len());
    for spec in specs {
        if spec.capacity == 0 {
            return Err(Error::invalid_vehicle(spec.id, "capacity must be positive"));
        }
        if !seen.insert(spec.id) {
            return Err(Error::invalid_vehicle(spec.id, "duplicate vehicle id"));
        }
    }
    Ok(())
}

/// Installs and lists the fleet.
#[derive(Clone)]
pub struct FleetRegistry {
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for FleetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetRegistry").finish_non_exhaustive()
    }
}

impl FleetRegistry {
    /// Creates a registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Replaces the whole fleet and clears every assignment and waiting group.
    ///
    /// An empty fleet is accepted; every later journey then waits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFleet`] before any mutation if the definition is
    /// malformed, or a store error if the replacement fails.
    #[tracing::instrument(skip_all, fields(vehicles = specs.len()))]
    pub async fn register_fleet(&self, specs: &[VehicleSpec]) -> Result<()> {
        validate_fleet(specs)?;

        let mut documents: Vec<Document> = specs
            .iter()
            .map(|spec| Vehicle::new(spec.id, spec.capacity).into())
            .collect();
        documents.push(WaitingQueue::new().into());

        self.store.replace_all(documents).await?;
        tracing::info!(vehicles = specs.len(), "fleet registered");
        Ok(())
    }

    /// Returns every vehicle ordered by id.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub async fn list_vehicles(&self) -> Result<Vec<Vehicle>> {
        let documents = self.store.find_all(Filter::AnyVehicle, Order::ById).await?;
        documents
            .into_iter()
            .map(|doc| doc.into_vehicle().map_err(Error::from))
            .collect()
    }
}
