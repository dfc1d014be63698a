//! Document model shared by the engine and every store backend.
//!
//! The store holds two kinds of documents:
//!
//! - One [`Vehicle`] per registered vehicle, carrying its seated groups
//! - A single [`WaitingQueue`], a virtual vehicle of unbounded capacity that keeps
//!   the groups nobody could seat yet, plus the reassignment marker
//!
//! Keeping the whole queue in one document is what lets a backend with only
//! per-document atomicity enqueue, dequeue and mark it atomically.
//!
//! ## Invariants
//!
//! - `capacity - seats_available == Σ occupants.size` for every vehicle
//! - the waiting queue is sorted by `(arrived_at, id)` ascending
//! - a group id appears in at most one document
//! - the queue's active set holds exactly the ids seated or waiting anywhere

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::{GroupId, VehicleId};

/// A group of people travelling together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Caller-supplied identifier.
    pub id: GroupId,
    /// Number of people; the seats this group consumes.
    pub size: u32,
    /// When the journey was requested. Defines FIFO order while waiting.
    pub arrived_at: DateTime<Utc>,
}

impl Group {
    /// Creates a group that arrives now.
    #[must_use]
    pub fn new(id: GroupId, size: u32) -> Self {
        Self::arrived(id, size, Utc::now())
    }

    /// Creates a group with an explicit arrival time.
    #[must_use]
    pub const fn arrived(id: GroupId, size: u32, arrived_at: DateTime<Utc>) -> Self {
        Self {
            id,
            size,
            arrived_at,
        }
    }

    /// Compares two groups by arrival, ties broken by id.
    #[must_use]
    pub fn cmp_arrival(&self, other: &Self) -> Ordering {
        self.arrived_at
            .cmp(&other.arrived_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A vehicle with a fixed number of seats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    /// Vehicle identifier.
    pub id: VehicleId,
    /// Total seats, fixed at registration.
    pub capacity: u32,
    /// Seats not currently taken.
    pub seats_available: u32,
    /// Groups currently seated.
    pub occupants: Vec<Group>,
    /// Bumped on every mutation.
    pub version: u64,
}

impl Vehicle {
    /// Creates an empty vehicle.
    #[must_use]
    pub const fn new(id: VehicleId, capacity: u32) -> Self {
        Self {
            id,
            capacity,
            seats_available: capacity,
            occupants: Vec::new(),
            version: 0,
        }
    }

    /// Returns true if the group is seated here.
    #[must_use]
    pub fn contains(&self, group_id: GroupId) -> bool {
        self.occupants.iter().any(|g| g.id == group_id)
    }

    /// Total people currently seated.
    #[must_use]
    pub fn occupied_seats(&self) -> u64 {
        self.occupants.iter().map(|g| u64::from(g.size)).sum()
    }

    /// Returns true if seat accounting matches the seated groups.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.seats_available <= self.capacity
            && u64::from(self.capacity - self.seats_available) == self.occupied_seats()
    }

    /// Returns the id and current free seats.
    #[must_use]
    pub const fn summary(&self) -> VehicleSummary {
        VehicleSummary {
            id: self.id,
            seats_available: self.seats_available,
        }
    }
}

/// What callers learn about a vehicle when a group is seated in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSummary {
    /// Vehicle identifier.
    pub id: VehicleId,
    /// Seats available at the time of the read.
    pub seats_available: u32,
}

/// Marker stating that a reassignment sweep is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignMarker {
    /// Identity of the sweeper that set the marker.
    pub holder: String,
    /// When the marker was set.
    pub since: DateTime<Utc>,
}

impl ReassignMarker {
    /// Creates a marker set now by `holder`.
    #[must_use]
    pub fn new(holder: impl Into<String>) -> Self {
        Self {
            holder: holder.into(),
            since: Utc::now(),
        }
    }
}

/// The FIFO queue of groups waiting for a seat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingQueue {
    /// Waiting groups in arrival order.
    pub groups: Vec<Group>,
    /// Set while a reassignment sweep holds the queue.
    pub reassigning_since: Option<ReassignMarker>,
    /// Ids of every group currently seated or waiting.
    ///
    /// Admission claims an id here in the same step that seats or queues the
    /// group, so two journeys with one id can never both be admitted.
    #[serde(default)]
    pub active_groups: BTreeSet<GroupId>,
    /// Bumped on every mutation.
    pub version: u64,
}

impl WaitingQueue {
    /// Creates an empty, unmarked queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the group is waiting.
    #[must_use]
    pub fn contains(&self, group_id: GroupId) -> bool {
        self.groups.iter().any(|g| g.id == group_id)
    }

    /// Returns true if the id belongs to a seated or waiting group.
    #[must_use]
    pub fn is_active(&self, group_id: GroupId) -> bool {
        self.active_groups.contains(&group_id)
    }

    /// Returns true if this exact entry is waiting.
    #[must_use]
    pub fn holds(&self, group: &Group) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Inserts a group at its arrival position.
    ///
    /// Returns false if a group with the same id is already waiting.
    pub fn insert(&mut self, group: Group) -> bool {
        if self.contains(group.id) {
            return false;
        }
        let at = self
            .groups
            .partition_point(|g| g.cmp_arrival(&group) == Ordering::Less);
        self.groups.insert(at, group);
        true
    }

    /// Removes and returns the group with the given id.
    pub fn remove(&mut self, group_id: GroupId) -> Option<Group> {
        let at = self.groups.iter().position(|g| g.id == group_id)?;
        Some(self.groups.remove(at))
    }

    /// Returns true if the groups are in arrival order.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.groups
            .windows(2)
            .all(|w| w[0].cmp_arrival(&w[1]) != Ordering::Greater)
    }
}

/// Key addressing a single document in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentKey {
    /// A vehicle document.
    Vehicle(VehicleId),
    /// The waiting queue document.
    Queue,
}

/// A document held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Document {
    /// A vehicle.
    Vehicle(Vehicle),
    /// The waiting queue.
    Queue(WaitingQueue),
}

impl Document {
    /// Returns the key this document is stored under.
    #[must_use]
    pub const fn key(&self) -> DocumentKey {
        match self {
            Self::Vehicle(v) => DocumentKey::Vehicle(v.id),
            Self::Queue(_) => DocumentKey::Queue,
        }
    }

    /// Returns the document version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        match self {
            Self::Vehicle(v) => v.version,
            Self::Queue(q) => q.version,
        }
    }

    pub(crate) fn bump_version(&mut self) {
        match self {
            Self::Vehicle(v) => v.version += 1,
            Self::Queue(q) => q.version += 1,
        }
    }

    /// Borrows the vehicle, if this is one.
    #[must_use]
    pub const fn as_vehicle(&self) -> Option<&Vehicle> {
        match self {
            Self::Vehicle(v) => Some(v),
            Self::Queue(_) => None,
        }
    }

    /// Borrows the waiting queue, if this is it.
    #[must_use]
    pub const fn as_queue(&self) -> Option<&WaitingQueue> {
        match self {
            Self::Queue(q) => Some(q),
            Self::Vehicle(_) => None,
        }
    }

    /// Converts into a vehicle.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the document is the waiting queue.
    pub fn into_vehicle(self) -> Result<Vehicle> {
        match self {
            Self::Vehicle(v) => Ok(v),
            Self::Queue(_) => Err(Error::internal("expected vehicle document, found queue")),
        }
    }

    /// Converts into the waiting queue.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the document is a vehicle.
    pub fn into_queue(self) -> Result<WaitingQueue> {
        match self {
            Self::Queue(q) => Ok(q),
            Self::Vehicle(v) => Err(Error::internal(format!(
                "expected queue document, found vehicle {}",
                v.id
            ))),
        }
    }
}

impl From<Vehicle> for Document {
    fn from(vehicle: Vehicle) -> Self {
        Self::Vehicle(vehicle)
    }
}

impl From<WaitingQueue> for Document {
    fn from(queue: WaitingQueue) -> Self {
        Self::Queue(queue)
    }
}
