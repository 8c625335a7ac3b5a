//! Role-conditional end-of-call behavior.
//!
//! The controller never branches on [`Role`] directly; it asks the session's
//! [`EndOfCallPolicy`] what to do when the budget runs out and whether the
//! notes passed to `end_call` should be persisted.

use crate::actors::session::CallSession;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Which side of the consultation this device is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Clinician,
    Patient,
}

impl Role {
    /// Bounded metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Clinician => "clinician",
            Role::Patient => "patient",
        }
    }

    /// The policy implementing this role's end-of-call behavior.
    #[must_use]
    pub fn policy(self) -> Box<dyn EndOfCallPolicy> {
        match self {
            Role::Clinician => Box::new(ClinicianPolicy),
            Role::Patient => Box::new(PatientPolicy),
        }
    }
}

/// What the controller does when the countdown reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryAction {
    /// Leave the channel now, keep the session open until `end_call(notes)`.
    LeaveAndAwaitNotes,
    /// Run `end_call` immediately with no notes.
    EndCall,
}

/// Strategy for role-specific termination.
pub trait EndOfCallPolicy: Debug + Send + Sync {
    /// The role this policy serves.
    fn role(&self) -> Role;

    /// Decide how to react to budget expiry.
    fn on_expiry(&self, session: &CallSession) -> ExpiryAction;

    /// The notes to persist for `end_call`, if any.
    fn notes_to_persist<'a>(&self, notes: Option<&'a str>) -> Option<&'a str>;
}

/// Clinicians write consultation notes before the call is closed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClinicianPolicy;

impl EndOfCallPolicy for ClinicianPolicy {
    fn role(&self) -> Role {
        Role::Clinician
    }

    fn on_expiry(&self, _session: &CallSession) -> ExpiryAction {
        ExpiryAction::LeaveAndAwaitNotes
    }

    fn notes_to_persist<'a>(&self, notes: Option<&'a str>) -> Option<&'a str> {
        notes.filter(|n| !n.trim().is_empty())
    }
}

/// Patients are simply disconnected when time is up.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatientPolicy;

impl EndOfCallPolicy for PatientPolicy {
    fn role(&self) -> Role {
        Role::Patient
    }

    fn on_expiry(&self, _session: &CallSession) -> ExpiryAction {
        ExpiryAction::EndCall
    }

    fn notes_to_persist<'a>(&self, _notes: Option<&'a str>) -> Option<&'a str> {
        None
    }
}
