//! Metric definitions for the session controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `session_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `role`: 2 values (clinician, patient)
//! - `reason`: 3 values (explicit, expired, shutdown)
//! - `status`: 2 values (success, error)
//! - `kind`: bounded by `SessionEvent` variants, or (initial, reconnect)
//!
//! No recorder is installed here; the embedding application picks one.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric: `session_calls_started_total`
/// Labels: `role`
pub fn record_call_started(role: &str) {
    counter!("session_calls_started_total", "role" => role.to_string()).increment(1);
}

/// Metric: `session_calls_ended_total`
/// Labels: `role`, `reason`
pub fn record_call_ended(role: &str, reason: &str) {
    counter!("session_calls_ended_total",
        "role" => role.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Metric: `session_expiries_total`
/// Labels: `role`
pub fn record_expiry(role: &str) {
    counter!("session_expiries_total", "role" => role.to_string()).increment(1);
}

/// Metric: `session_reconnect_attempts_total`
pub fn record_reconnect_attempt() {
    counter!("session_reconnect_attempts_total").increment(1);
}

/// Metric: `session_reconnects_exhausted_total`
///
/// Incremented when every reconnection attempt failed and the countdown
/// was stopped.
pub fn record_reconnect_exhausted() {
    counter!("session_reconnects_exhausted_total").increment(1);
}

/// Metric: `session_token_renewals_total`
/// Labels: `status`
pub fn record_token_renewal(status: &str) {
    counter!("session_token_renewals_total", "status" => status.to_string()).increment(1);
}

/// Metric: `session_notes_persistence_total`
/// Labels: `status`
pub fn record_notes_persistence(status: &str) {
    counter!("session_notes_persistence_total", "status" => status.to_string()).increment(1);
}

/// Metric: `session_events_total`
/// Labels: `kind`
pub fn record_event(kind: &str) {
    counter!("session_events_total", "kind" => kind.to_string()).increment(1);
}

/// Metric: `session_join_duration_seconds`
/// Labels: `kind` (initial, reconnect)
pub fn record_join_duration(kind: &str, duration: Duration) {
    histogram!("session_join_duration_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// Metric: `session_remote_participants`
pub fn set_remote_participants(count: usize) {
    // usize to f64 conversion is safe for realistic participant counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("session_remote_participants").set(count as f64);
}

/// Metric: `session_actor_mailbox_depth`
pub fn set_mailbox_depth(depth: usize) {
    // usize to f64 conversion is safe for realistic mailbox depths
    #[allow(clippy::cast_precision_loss)]
    gauge!("session_actor_mailbox_depth").set(depth as f64);
}
