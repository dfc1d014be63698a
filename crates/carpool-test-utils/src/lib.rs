//! Shared test utilities for carpool integration tests.
//!
//! This crate provides:
//! - [`FaultyStore`]: In-memory store with fault injection and operation recording
//! - Factory functions for fleets, groups and services
//! - Invariant assertions over store contents
//!
//! # Example
//!
//! ```rust,ignore
//! use carpool_test_utils::{assert_pool_invariants, faulty_service, fleet, group};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let (service, store) = faulty_service();
//!     service.register_fleet(&fleet(&[(1, 4)])).await.unwrap();
//!     service.journey(group(1, 2)).await.unwrap();
//!     assert_pool_invariants(&store).await;
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod store;

pub use assertions::*;
pub use fixtures::*;
pub use store::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("carpool_engine=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
