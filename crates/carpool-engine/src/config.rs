//! Engine configuration.
//!
//! Defaults suit a single process sharing one store; every knob can be
//! overridden from the environment:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `CARPOOL_RETRY_MAX_ATTEMPTS` | 3 | Attempts per store operation, including the first |
//! | `CARPOOL_RETRY_BASE_DELAY_MS` | 150 | Delay before the first retry, doubled per retry |
//! | `CARPOOL_RETRY_MAX_DELAY_MS` | 2000 | Cap on any single retry delay |
//! | `CARPOOL_SWEEP_STALE_AFTER_SECS` | 10 | Age after which a sweep marker is considered abandoned |
//! | `CARPOOL_SWEEP_QUEUE_DEPTH` | 1 | Pending sweep triggers before new ones coalesce |
//! | `CARPOOL_LOG_FORMAT` | `pretty` | `json` or `pretty`, passed to [`init_logging`](carpool_core::observability::init_logging) |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use carpool_core::observability::LogFormat;
use carpool_core::{Error, Result};

use crate::retry::RetryPolicy;

/// Default age after which a held sweep marker may be stolen.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10);

/// Default number of buffered sweep triggers.
pub const DEFAULT_QUEUE_DEPTH: usize = 1;

/// Reassignment sweep settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// A marker older than this is treated as left behind by a dead sweeper.
    pub stale_after: Duration,
    /// Capacity of the trigger queue. Triggers beyond it merge into a pending one.
    pub queue_depth: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolingConfig {
    /// Retry policy for store operations.
    pub retry: RetryPolicy,
    /// Sweep settings.
    pub sweep: SweepConfig,
    /// Output format for the host's log subscriber.
    pub log_format: LogFormat,
}

impl PoolingConfig {
    /// Loads configuration from `CARPOOL_*` environment variables.
    ///
    /// Unset or blank variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the variable if a value cannot be
    /// parsed or the result fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let mut config = Self::default();

        if let Some(attempts) = vars.u32("CARPOOL_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = vars.u64("CARPOOL_RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = vars.u64("CARPOOL_RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = vars.u64("CARPOOL_SWEEP_STALE_AFTER_SECS")? {
            config.sweep.stale_after = Duration::from_secs(secs);
        }
        if let Some(depth) = vars.usize("CARPOOL_SWEEP_QUEUE_DEPTH")? {
            config.sweep.queue_depth = depth;
        }
        if let Some(format) = vars.string("CARPOOL_LOG_FORMAT") {
            config.log_format = LogFormat::from_name(&format);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "CARPOOL_RETRY_MAX_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(Error::InvalidInput(
                "CARPOOL_RETRY_MAX_DELAY_MS must be at least CARPOOL_RETRY_BASE_DELAY_MS"
                    .to_string(),
            ));
        }
        if self.sweep.queue_depth == 0 {
            return Err(Error::InvalidInput(
                "CARPOOL_SWEEP_QUEUE_DEPTH must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn u32(&self, name: &str) -> Result<Option<u32>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u32>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u32: {e}")))
    }

    fn u64(&self, name: &str) -> Result<Option<u64>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u64>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
    }

    fn usize(&self, name: &str) -> Result<Option<usize>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<usize>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
    }
}
