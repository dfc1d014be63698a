//! Pre-built fixtures for common test scenarios.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use carpool_core::{DocumentStore, Group, GroupId, VehicleId};
use carpool_engine::config::{PoolingConfig, SweepConfig};
use carpool_engine::fleet::VehicleSpec;
use carpool_engine::retry::RetryPolicy;
use carpool_engine::PoolingService;

use crate::store::FaultyStore;

/// Fixed base instant for deterministic arrival times.
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp")
}

/// Builds vehicle specs from `(id, capacity)` pairs.
pub fn fleet(vehicles: &[(u64, u32)]) -> Vec<VehicleSpec> {
    vehicles
        .iter()
        .map(|&(id, capacity)| VehicleSpec::new(VehicleId::new(id), capacity))
        .collect()
}

/// A group arriving now.
pub fn group(id: u64, size: u32) -> Group {
    Group::new(GroupId::new(id), size)
}

/// A group arriving `offset_ms` after [`epoch`].
pub fn group_at(id: u64, size: u32, offset_ms: i64) -> Group {
    Group::arrived(
        GroupId::new(id),
        size,
        epoch() + chrono::Duration::milliseconds(offset_ms),
    )
}

/// Groups with ids `first, first + 1, ...` arriving one millisecond apart.
pub fn arrivals(first: u64, sizes: &[u32]) -> Vec<Group> {
    sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let index = u64::try_from(i).expect("small index");
            let offset = i64::try_from(i).expect("small index");
            group_at(first + index, size, offset)
        })
        .collect()
}

/// Retry policy with millisecond delays, for tests that exercise retries.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
}

/// Configuration with fast retries and default sweep settings.
pub fn fast_config() -> PoolingConfig {
    PoolingConfig {
        retry: fast_retry(),
        sweep: SweepConfig::default(),
        ..PoolingConfig::default()
    }
}

/// A service over a fresh [`FaultyStore`], returned together with the store.
pub fn faulty_service() -> (PoolingService, FaultyStore) {
    let store = FaultyStore::new();
    let service = service_over(Arc::new(store.clone()));
    (service, store)
}

/// A service over `store` with [`fast_config`].
pub fn service_over(store: Arc<dyn DocumentStore>) -> PoolingService {
    PoolingService::new(store, fast_config()).expect("valid config")
}
