//! Actor metrics and mailbox monitoring.
//!
//! Mailbox depth thresholds for the controller actor:
//!
//! | Normal | Warning | Critical |
//! |--------|---------|----------|
//! | < 16   | 16-64   | > 64     |
//!
//! UI commands arrive at human speed, so a deep mailbox means the actor is
//! stuck (usually on a slow session API call).

use crate::observability::metrics as prom;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds.
pub const CONTROLLER_MAILBOX_NORMAL: usize = 16;
pub const CONTROLLER_MAILBOX_WARNING: usize = 64;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Mailbox monitor for tracking queue depth.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Controller identifier for logs.
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);
        prom::set_mailbox_depth(new_depth);

        match level_for_depth(new_depth) {
            MailboxLevel::Critical => warn!(
                target: "session.actor.mailbox",
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = CONTROLLER_MAILBOX_WARNING,
                "Mailbox depth critical"
            ),
            MailboxLevel::Warning if new_depth == CONTROLLER_MAILBOX_NORMAL + 1 => debug!(
                target: "session.actor.mailbox",
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            ),
            _ => {}
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or(0);
        prom::set_mailbox_depth(previous.saturating_sub(1));
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        level_for_depth(self.current_depth())
    }
}

fn level_for_depth(depth: usize) -> MailboxLevel {
    if depth > CONTROLLER_MAILBOX_WARNING {
        MailboxLevel::Critical
    } else if depth > CONTROLLER_MAILBOX_NORMAL {
        MailboxLevel::Warning
    } else {
        MailboxLevel::Normal
    }
}

/// Call lifecycle counters.
///
/// Shared between the actor (which updates values) and whoever embeds the
/// controller (diagnostics screens, tests). Every update is also forwarded
/// to the `metrics` facade.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    calls_started: AtomicU64,
    calls_ended: AtomicU64,
    expiries: AtomicU64,
    reconnect_attempts: AtomicU64,
    reconnects_exhausted: AtomicU64,
    token_renewals: AtomicU64,
    notes_persisted: AtomicU64,
    notes_persist_failures: AtomicU64,
    events_processed: AtomicU64,
}

/// Point-in-time copy of [`SessionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMetricsSnapshot {
    pub calls_started: u64,
    pub calls_ended: u64,
    pub expiries: u64,
    pub reconnect_attempts: u64,
    pub reconnects_exhausted: u64,
    pub token_renewals: u64,
    pub notes_persisted: u64,
    pub notes_persist_failures: u64,
    pub events_processed: u64,
}

impl SessionMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn call_started(&self, role: &str) {
        self.calls_started.fetch_add(1, Ordering::SeqCst);
        prom::record_call_started(role);
    }

    pub fn call_ended(&self, role: &str, reason: &str) {
        self.calls_ended.fetch_add(1, Ordering::SeqCst);
        prom::record_call_ended(role, reason);
    }

    pub fn expiry(&self, role: &str) {
        self.expiries.fetch_add(1, Ordering::SeqCst);
        prom::record_expiry(role);
    }

    pub fn reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        prom::record_reconnect_attempt();
    }

    pub fn reconnect_exhausted(&self) {
        self.reconnects_exhausted.fetch_add(1, Ordering::SeqCst);
        prom::record_reconnect_exhausted();
    }

    pub fn token_renewed(&self, status: &str) {
        self.token_renewals.fetch_add(1, Ordering::SeqCst);
        prom::record_token_renewal(status);
    }

    pub fn notes_persisted(&self, success: bool) {
        if success {
            self.notes_persisted.fetch_add(1, Ordering::SeqCst);
        } else {
            self.notes_persist_failures.fetch_add(1, Ordering::SeqCst);
        }
        prom::record_notes_persistence(if success { "success" } else { "error" });
    }

    pub fn event_processed(&self, kind: &str) {
        self.events_processed.fetch_add(1, Ordering::SeqCst);
        prom::record_event(kind);
    }

    /// Take a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> SessionMetricsSnapshot {
        SessionMetricsSnapshot {
            calls_started: self.calls_started.load(Ordering::SeqCst),
            calls_ended: self.calls_ended.load(Ordering::SeqCst),
            expiries: self.expiries.load(Ordering::SeqCst),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
            reconnects_exhausted: self.reconnects_exhausted.load(Ordering::SeqCst),
            token_renewals: self.token_renewals.load(Ordering::SeqCst),
            notes_persisted: self.notes_persisted.load(Ordering::SeqCst),
            notes_persist_failures: self.notes_persist_failures.load(Ordering::SeqCst),
            events_processed: self.events_processed.load(Ordering::SeqCst),
        }
    }
}
