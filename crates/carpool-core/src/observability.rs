//! Logging setup and the spans every pooling operation runs in.
//!
//! Request-path spans carry the group being handled and, once known, where it
//! ended up; sweep spans carry the sweep number, the marker holder and how many
//! groups were seated. Fields left [`Empty`](tracing::field::Empty) at creation
//! are filled in with [`Span::record`] when the operation finishes.

use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing::field::Empty;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::id::GroupId;
use crate::model::Group;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human-readable output.
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses a format name, falling back to [`LogFormat::Pretty`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Installs the global subscriber once.
///
/// Levels come from `RUST_LOG` (default `info`), e.g.
/// `RUST_LOG=carpool_engine::sweep=debug`. Later calls are no-ops, and a
/// subscriber already installed by the host application is left in place.
///
/// ```rust
/// use carpool_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::from_name("json"));
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let installed = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
        if installed.is_err() {
            tracing::debug!("global subscriber already set, keeping it");
        }
    });
}

/// Span for a journey request.
///
/// `outcome` and `vehicle_id` are recorded once the group is seated or queued.
///
/// ```rust
/// use carpool_core::observability::journey_span;
/// use carpool_core::{Group, GroupId};
///
/// let span = journey_span(&Group::new(GroupId::new(42), 3));
/// span.record("outcome", "waiting");
/// ```
#[must_use]
pub fn journey_span(group: &Group) -> Span {
    tracing::info_span!(
        "journey",
        group_id = %group.id,
        size = group.size,
        outcome = Empty,
        vehicle_id = Empty,
    )
}

/// Span for a dropoff request; `outcome` is recorded when it completes.
#[must_use]
pub fn dropoff_span(group_id: GroupId) -> Span {
    tracing::info_span!("dropoff", %group_id, outcome = Empty)
}

/// Span for a locate request.
#[must_use]
pub fn locate_span(group_id: GroupId) -> Span {
    tracing::debug_span!("locate", %group_id)
}

/// Span for one reassignment sweep run by `holder`.
///
/// `seated` and `still_waiting` are recorded when the sweep ends.
#[must_use]
pub fn sweep_span(sweep: u64, holder: &str) -> Span {
    tracing::info_span!(
        "sweep",
        sweep,
        holder,
        seated = Empty,
        still_waiting = Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn log_format_from_name() {
        assert_eq!(LogFormat::from_name(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::from_name("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_name("whatever"), LogFormat::Pretty);
    }

    #[test]
    fn spans_accept_their_late_fields() {
        init_logging(LogFormat::Pretty);

        let span = journey_span(&Group::new(GroupId::new(7), 2));
        span.record("outcome", "seated");
        span.record("vehicle_id", 3_u64);
        span.in_scope(|| tracing::info!("inside journey span"));

        let span = dropoff_span(GroupId::new(7));
        span.record("outcome", "freed");

        let span = sweep_span(1, "sweeper-a");
        span.record("seated", 2_usize);
        span.record("still_waiting", 0_usize);
        span.in_scope(|| tracing::info!("inside sweep span"));

        let _ = locate_span(GroupId::new(7));
    }
}
