//! Common configuration types for Telecall components.

use serde::{Deserialize, Serialize};

/// Default tracing filter when `LOG_LEVEL` is not set.
pub const DEFAULT_LOG_FILTER: &str = "session_controller=debug";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (e.g. `info`, `session_controller=debug`)
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}
