//! # carpool-engine
//!
//! Seat allocation and reassignment for a fleet of shared vehicles.
//!
//! Groups of people ask for a journey; each is seated in the vehicle whose free
//! seats fit it most tightly, or queued if nothing fits. Whenever a dropoff frees
//! seats, a background sweep walks the queue in arrival order and seats whoever
//! now fits.
//!
//! ## Components
//!
//! - **Fleet Registry** ([`fleet`]): wholesale fleet replacement
//! - **Allocator** ([`allocator`]): best-fit seating with waiting fallback
//! - **Waiting Queue** ([`queue`]): FIFO queue operations
//! - **Sweep Lock** ([`lock`]): one sweep at a time, stale markers are taken over
//! - **Reassignment** ([`sweep`], [`worker`], [`coordinator`]): dropoffs, sweeps and
//!   the worker that runs them
//! - **Locator** ([`locator`]): read-only group lookup
//! - **Service** ([`service`]): the facade wiring all of the above
//!
//! ## Guarantees
//!
//! - **No overbooking**: seat checks and seat decrements are one atomic store step
//! - **Exclusivity**: a group is seated in one vehicle or waiting, never both
//! - **Fairness**: a sweep attempts waiting groups strictly in arrival order
//!
//! All coordination goes through the [`DocumentStore`](carpool_core::DocumentStore)
//! contract, so several processes may share one store.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod allocator;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fleet;
pub mod locator;
pub mod lock;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod service;
pub mod sweep;
pub mod worker;

pub use error::{Error, Result};
pub use service::{PoolStatus, PoolingService};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::allocator::JourneyOutcome;
    pub use crate::config::{PoolingConfig, SweepConfig};
    pub use crate::coordinator::DropoffOutcome;
    pub use crate::error::{Error, Result};
    pub use crate::fleet::VehicleSpec;
    pub use crate::locator::Located;
    pub use crate::retry::RetryPolicy;
    pub use crate::service::{PoolStatus, PoolingService};
    pub use crate::sweep::{SweepReport, SweepStatus};
    pub use crate::worker::SweepHandle;
}
