//! Consultation countdown.
//!
//! `Countdown` holds the remaining budget and the running/expired flags. It
//! has no clock of its own: the controller actor owns a `tokio::time::Interval`
//! and calls [`Countdown::tick`] once per second while the countdown runs, so
//! tests drive it with paused tokio time instead of real sleeps.

/// Result of a single one-second tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Countdown is not running; nothing changed.
    Idle,
    /// One second consumed; the new remaining value.
    Running(u32),
    /// One second consumed and the low-time threshold was crossed.
    LowTime(u32),
    /// The budget just reached zero. Returned at most once per countdown.
    Expired,
}

/// Remaining consultation time.
#[derive(Debug, Clone)]
pub struct Countdown {
    remaining: u32,
    low_time_threshold: u32,
    running: bool,
    expired: bool,
    low_time_raised: bool,
}

impl Countdown {
    /// Create a stopped countdown with the given budget.
    #[must_use]
    pub fn new(budget_seconds: u32, low_time_threshold: u32) -> Self {
        Self {
            remaining: budget_seconds,
            low_time_threshold,
            running: false,
            expired: budget_seconds == 0,
            low_time_raised: budget_seconds <= low_time_threshold,
        }
    }

    /// Start (or resume) the countdown. Returns false if there is nothing
    /// left to count.
    pub fn start(&mut self) -> bool {
        if self.expired || self.remaining == 0 {
            return false;
        }
        self.running = true;
        true
    }

    /// Freeze the countdown at its current value.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Consume one second.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.running || self.expired {
            return TickOutcome::Idle;
        }

        self.remaining = self.remaining.saturating_sub(1);

        if self.remaining == 0 {
            self.running = false;
            self.expired = true;
            return TickOutcome::Expired;
        }

        if !self.low_time_raised && self.remaining <= self.low_time_threshold {
            self.low_time_raised = true;
            return TickOutcome::LowTime(self.remaining);
        }

        TickOutcome::Running(self.remaining)
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Whether the low-time threshold has been reached.
    #[must_use]
    pub fn is_low_time(&self) -> bool {
        self.low_time_raised
    }
}
