//! Strongly-typed identifiers for vehicles and groups.
//!
//! Both identifiers are supplied by callers (the fleet definition and the journey
//! request respectively), so they wrap plain integers rather than generated ULIDs.
//! They are distinct types so a vehicle id can never be passed where a group id is
//! expected.
//!
//! # Example
//!
//! ```rust
//! use carpool_core::id::{GroupId, VehicleId};
//!
//! let vehicle = VehicleId::new(7);
//! let group: GroupId = "42".parse().unwrap();
//!
//! assert_eq!(vehicle.get(), 7);
//! assert_eq!(group.to_string(), "42");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A unique identifier for a vehicle in the fleet.
///
/// Vehicle ids are immutable once the fleet is registered and define the
/// tie-break order when two vehicles fit a group equally well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(u64);

impl VehicleId {
    /// Creates a vehicle ID from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for VehicleId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VehicleId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| Error::InvalidInput(format!("invalid vehicle ID '{s}': {e}")))
    }
}

/// A unique identifier for a group of people requesting a journey.
///
/// Unique among active (seated or waiting) groups; an id may be reused once
/// the previous group with that id has been dropped off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(u64);

impl GroupId {
    /// Creates a group ID from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for GroupId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| Error::InvalidInput(format!("invalid group ID '{s}': {e}")))
    }
}
