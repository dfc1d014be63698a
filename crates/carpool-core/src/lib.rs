//! # carpool-core
//!
//! Core abstractions for the carpool allocation engine.
//!
//! This crate provides the primitives shared by the engine and every store backend:
//!
//! - **Identifiers**: Strongly-typed [`VehicleId`] and [`GroupId`]
//! - **Documents**: [`Vehicle`], [`Group`] and the single [`WaitingQueue`]
//! - **Store Contract**: The [`DocumentStore`] trait with atomic conditional updates,
//!   all-or-nothing transactions and atomic replacement
//! - **Reference Store**: [`MemoryStore`], an in-process implementation of the contract
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Example
//!
//! ```rust
//! use carpool_core::prelude::*;
//!
//! # tokio_test_block_on(async {
//! let store = MemoryStore::new();
//! store
//!     .replace_all(vec![
//!         Vehicle::new(VehicleId::new(1), 4).into(),
//!         WaitingQueue::new().into(),
//!     ])
//!     .await?;
//!
//! let group = Group::new(GroupId::new(7), 3);
//! let seated = store
//!     .conditional_update(
//!         ConditionalUpdate::new(Filter::vehicle_for(&group), Mutation::Seat(group))
//!             .ordered(Order::TightestFit),
//!     )
//!     .await?;
//! assert!(seated.is_some());
//! # Ok::<(), Error>(())
//! # }).unwrap();
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod error;
pub mod id;
pub mod model;
pub mod observability;
pub mod store;

pub use error::{Error, Result};
pub use id::{GroupId, VehicleId};
pub use model::{
    Document, DocumentKey, Group, ReassignMarker, Vehicle, VehicleSummary, WaitingQueue,
};
pub use store::memory::MemoryStore;
pub use store::{ConditionalUpdate, DocumentStore, Filter, Mutation, Order, TxnResult};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{GroupId, VehicleId};
    pub use crate::model::{
        Document, DocumentKey, Group, ReassignMarker, Vehicle, VehicleSummary, WaitingQueue,
    };
    pub use crate::store::memory::MemoryStore;
    pub use crate::store::{
        ConditionalUpdate, DocumentStore, Filter, Mutation, Order, TxnResult,
    };
}
