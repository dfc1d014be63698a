//! Error types for the allocation engine.

use carpool_core::{GroupId, VehicleId};

/// The result type used throughout carpool-engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in engine operations.
///
/// Outcomes that are part of normal operation (a group waiting, an unknown id on
/// dropoff, a reassignment losing a race) are return values, not errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The fleet definition was rejected before anything was reset.
    #[error("invalid fleet: {message}")]
    InvalidFleet {
        /// Description of the problem.
        message: String,
        /// The offending vehicle, if one can be named.
        vehicle_id: Option<VehicleId>,
    },

    /// The journey request was malformed.
    #[error("invalid group {group_id}: {message}")]
    InvalidGroup {
        /// The group in the request.
        group_id: GroupId,
        /// Description of the problem.
        message: String,
    },

    /// A group with this id is already seated or waiting.
    #[error("group {group_id} is already active")]
    DuplicateGroup {
        /// The colliding id.
        group_id: GroupId,
    },

    /// A transient store failure persisted through every retry.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// The operation that was retried.
        operation: &'static str,
        /// How many attempts were made.
        attempts: u32,
        /// The last failure.
        #[source]
        source: carpool_core::Error,
    },

    /// An error from the store layer.
    #[error("store error: {0}")]
    Core(#[from] carpool_core::Error),
}

impl Error {
    /// Creates an invalid-fleet error about one vehicle.
    #[must_use]
    pub fn invalid_vehicle(vehicle_id: VehicleId, message: impl Into<String>) -> Self {
        Self::InvalidFleet {
            message: message.into(),
            vehicle_id: Some(vehicle_id),
        }
    }

    /// Returns true if the request itself was rejected.
    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidFleet { .. }
                | Self::InvalidGroup { .. }
                | Self::DuplicateGroup { .. }
                | Self::Core(carpool_core::Error::InvalidInput(_))
        )
    }

    /// Returns true if the store could not be reached.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Core(carpool_core::Error::StoreUnavailable { .. })
                | Self::RetriesExhausted {
                    source: carpool_core::Error::StoreUnavailable { .. },
                    ..
                }
        )
    }

    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Core(err) => err.is_transient(),
            Self::RetriesExhausted { .. } => true,
            _ => false,
        }
    }
}
