//! Observability for the session controller.
//!
//! # Privacy by Default
//!
//! Actor loops use `#[instrument(skip_all)]` with explicit safe fields.
//! Channel tokens and clinician notes are never logged; notes are reported
//! only by length.
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `session_calls_started_total` | Counter | `role` |
//! | `session_calls_ended_total` | Counter | `role`, `reason` |
//! | `session_expiries_total` | Counter | `role` |
//! | `session_reconnect_attempts_total` | Counter | none |
//! | `session_reconnects_exhausted_total` | Counter | none |
//! | `session_token_renewals_total` | Counter | `status` |
//! | `session_notes_persistence_total` | Counter | `status` |
//! | `session_events_total` | Counter | `kind` |
//! | `session_join_duration_seconds` | Histogram | `kind` |
//! | `session_remote_participants` | Gauge | none |
//! | `session_actor_mailbox_depth` | Gauge | none |

pub mod metrics;

use common::config::ObservabilityConfig;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_installs_once() {
        let config = ObservabilityConfig {
            json_logs: true,
            ..ObservabilityConfig::default()
        };

        assert!(init_tracing(&config).is_ok());
        assert!(init_tracing(&config).is_err());
    }
}
