//! Observability metrics for the allocation engine.
//!
//! Metrics are exposed via the `metrics` crate facade; without an installed
//! recorder every call is a no-op.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `carpool_journeys_total` | Counter | `outcome` | Journey requests by outcome |
//! | `carpool_dropoffs_total` | Counter | `outcome` | Dropoff requests by outcome |
//! | `carpool_reassignments_total` | Counter | `outcome` | Per-group reassignment attempts |
//! | `carpool_sweeps_total` | Counter | `status` | Reassignment sweeps by status |
//! | `carpool_sweep_duration_seconds` | Histogram | - | Sweep wall time |
//! | `carpool_store_retries_total` | Counter | `operation` | Retries after transient store failures |
//! | `carpool_waiting_groups` | Gauge | - | Groups left waiting after the last sweep |

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Journey requests by outcome.
    pub const JOURNEYS_TOTAL: &str = "carpool_journeys_total";
    /// Counter: Dropoff requests by outcome.
    pub const DROPOFFS_TOTAL: &str = "carpool_dropoffs_total";
    /// Counter: Per-group reassignment attempts by outcome.
    pub const REASSIGNMENTS_TOTAL: &str = "carpool_reassignments_total";
    /// Counter: Sweeps by status.
    pub const SWEEPS_TOTAL: &str = "carpool_sweeps_total";
    /// Histogram: Sweep duration in seconds.
    pub const SWEEP_DURATION_SECONDS: &str = "carpool_sweep_duration_seconds";
    /// Counter: Retries after transient store failures.
    pub const STORE_RETRIES_TOTAL: &str = "carpool_store_retries_total";
    /// Gauge: Groups waiting after the last sweep.
    pub const WAITING_GROUPS: &str = "carpool_waiting_groups";
}

/// Label keys used across metrics.
pub mod labels {
    /// Operation outcome (seated, waiting, freed, not_found, ...).
    pub const OUTCOME: &str = "outcome";
    /// Sweep status (completed, skipped, failed).
    pub const STATUS: &str = "status";
    /// Retried operation name.
    pub const OPERATION: &str = "operation";
}

/// High-level interface for recording engine metrics.
///
/// Cheap to clone and share across tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolingMetrics;

impl PoolingMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a journey outcome.
    pub fn record_journey(&self, outcome: &'static str) {
        counter!(names::JOURNEYS_TOTAL, labels::OUTCOME => outcome).increment(1);
    }

    /// Records a dropoff outcome.
    pub fn record_dropoff(&self, outcome: &'static str) {
        counter!(names::DROPOFFS_TOTAL, labels::OUTCOME => outcome).increment(1);
    }

    /// Records one group's reassignment outcome.
    pub fn record_reassignment(&self, outcome: &'static str) {
        counter!(names::REASSIGNMENTS_TOTAL, labels::OUTCOME => outcome).increment(1);
    }

    /// Records a finished sweep.
    pub fn record_sweep(&self, status: &'static str, duration: Duration) {
        counter!(names::SWEEPS_TOTAL, labels::STATUS => status).increment(1);
        histogram!(names::SWEEP_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Records a retry of a store operation.
    pub fn record_retry(&self, operation: &'static str) {
        counter!(names::STORE_RETRIES_TOTAL, labels::OPERATION => operation).increment(1);
    }

    /// Sets the number of groups still waiting.
    #[allow(clippy::cast_precision_loss)] // queue lengths are far below 2^52
    pub fn set_waiting_groups(&self, count: usize) {
        gauge!(names::WAITING_GROUPS).set(count as f64);
    }
}
