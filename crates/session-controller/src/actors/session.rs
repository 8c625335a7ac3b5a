//! `CallSession` - state of the one live consultation.
//!
//! Owned exclusively by the controller actor. All mutation goes through the
//! methods here so the invariants hold regardless of event order:
//!
//! - State changes follow `Idle -> Connecting -> Connected <-> Disconnected`,
//!   with `Ended` reachable from anywhere and final
//! - Remote participants are a set; repeated joins and unknown leaves are no-ops
//! - Role and call id never change after creation

use crate::countdown::Countdown;
use crate::events::NetworkQuality;
use crate::policy::{EndOfCallPolicy, Role};

use common::types::{CallId, Uid};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

pub use crate::services::session_api::ChannelCredentials;

/// Lifecycle state of a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Ended,
}

impl CallState {
    /// Bounded label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Disconnected => "disconnected",
            CallState::Ended => "ended",
        }
    }

    /// Whether `self -> to` is an edge of the call state graph.
    #[must_use]
    pub const fn can_transition_to(self, to: CallState) -> bool {
        matches!(
            (self, to),
            (CallState::Idle, CallState::Connecting)
                | (CallState::Connecting, CallState::Connected | CallState::Disconnected)
                | (CallState::Connected, CallState::Disconnected)
                | (CallState::Disconnected, CallState::Connected)
                | (
                    CallState::Idle
                        | CallState::Connecting
                        | CallState::Connected
                        | CallState::Disconnected,
                    CallState::Ended
                )
        )
    }
}

/// Mute state a remote participant has announced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMedia {
    pub audio_muted: bool,
    pub video_muted: bool,
}

/// The live call.
#[derive(Debug)]
pub struct CallSession {
    call_id: CallId,
    policy: Box<dyn EndOfCallPolicy>,
    state: CallState,
    countdown: Countdown,
    credentials: ChannelCredentials,
    remote_participants: BTreeSet<Uid>,
    remote_media: BTreeMap<Uid, RemoteMedia>,
    network_quality: NetworkQuality,
    reconnecting: bool,
    reconnect_attempts: u32,
    awaiting_notes: bool,
    pending_notes: Option<String>,
}

impl CallSession {
    /// Create a session in `Idle` with a full, stopped countdown.
    #[must_use]
    pub fn new(
        call_id: CallId,
        role: Role,
        credentials: ChannelCredentials,
        budget_seconds: u32,
        low_time_warning_seconds: u32,
    ) -> Self {
        Self {
            call_id,
            policy: role.policy(),
            state: CallState::Idle,
            countdown: Countdown::new(budget_seconds, low_time_warning_seconds),
            credentials,
            remote_participants: BTreeSet::new(),
            remote_media: BTreeMap::new(),
            network_quality: NetworkQuality::Unknown,
            reconnecting: false,
            reconnect_attempts: 0,
            awaiting_notes: false,
            pending_notes: None,
        }
    }

    #[must_use]
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.policy.role()
    }

    #[must_use]
    pub fn policy(&self) -> &dyn EndOfCallPolicy {
        self.policy.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> CallState {
        self.state
    }

    /// Move to `to` if the state graph allows it. Returns whether the state
    /// changed; a same-state request is a silent no-op.
    pub fn transition_to(&mut self, to: CallState) -> bool {
        if self.state == to {
            return false;
        }
        if !self.state.can_transition_to(to) {
            warn!(
                target: "session.actor.controller",
                call_id = %self.call_id,
                from = self.state.as_str(),
                to = to.as_str(),
                "Rejected invalid call state transition"
            );
            return false;
        }
        self.state = to;
        true
    }

    #[must_use]
    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    pub fn countdown_mut(&mut self) -> &mut Countdown {
        &mut self.countdown
    }

    #[must_use]
    pub fn credentials(&self) -> &ChannelCredentials {
        &self.credentials
    }

    /// Swap in freshly issued credentials (renewal or reconnection).
    pub fn replace_credentials(&mut self, credentials: ChannelCredentials) {
        self.credentials = credentials;
    }

    /// Record the uid the engine actually joined under.
    pub fn set_local_uid(&mut self, uid: Uid) {
        self.credentials.uid = uid;
    }

    /// Add a remote participant. Returns false if already present.
    pub fn add_participant(&mut self, uid: Uid) -> bool {
        self.remote_participants.insert(uid)
    }

    /// Remove a remote participant and its media state. Returns false if the
    /// participant was not present.
    pub fn remove_participant(&mut self, uid: Uid) -> bool {
        self.remote_media.remove(&uid);
        self.remote_participants.remove(&uid)
    }

    /// Forget every remote participant, returning the uids that were present.
    /// Used once we have left the channel ourselves and will get no further
    /// offline notifications for it.
    pub fn clear_participants(&mut self) -> Vec<Uid> {
        self.remote_media.clear();
        std::mem::take(&mut self.remote_participants)
            .into_iter()
            .collect()
    }

    #[must_use]
    pub fn remote_participants(&self) -> &BTreeSet<Uid> {
        &self.remote_participants
    }

    /// Record a remote audio mute. Ignored for unknown participants.
    pub fn set_remote_audio_muted(&mut self, uid: Uid, muted: bool) -> bool {
        if !self.remote_participants.contains(&uid) {
            return false;
        }
        self.remote_media.entry(uid).or_default().audio_muted = muted;
        true
    }

    /// Record a remote video mute. Ignored for unknown participants.
    pub fn set_remote_video_muted(&mut self, uid: Uid, muted: bool) -> bool {
        if !self.remote_participants.contains(&uid) {
            return false;
        }
        self.remote_media.entry(uid).or_default().video_muted = muted;
        true
    }

    #[must_use]
    pub fn remote_media(&self) -> &BTreeMap<Uid, RemoteMedia> {
        &self.remote_media
    }

    /// Record the local link quality as the worse of both directions.
    pub fn record_network_quality(&mut self, tx: NetworkQuality, rx: NetworkQuality) {
        self.network_quality = NetworkQuality::worst(tx, rx);
    }

    #[must_use]
    pub fn network_quality(&self) -> NetworkQuality {
        self.network_quality
    }

    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    /// Enter reconnection with a fresh attempt count.
    pub fn begin_reconnecting(&mut self) {
        self.reconnecting = true;
        self.reconnect_attempts = 0;
    }

    /// Leave reconnection (success, exhaustion or teardown).
    pub fn finish_reconnecting(&mut self) {
        self.reconnecting = false;
        self.reconnect_attempts = 0;
    }

    /// Count one more reconnection attempt and return the new total.
    pub fn next_reconnect_attempt(&mut self) -> u32 {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.reconnect_attempts
    }

    #[must_use]
    pub fn is_awaiting_notes(&self) -> bool {
        self.awaiting_notes
    }

    pub fn set_awaiting_notes(&mut self, awaiting: bool) {
        self.awaiting_notes = awaiting;
    }

    /// Notes captured by `end_call`, kept until the session is dropped.
    #[must_use]
    pub fn pending_notes(&self) -> Option<&str> {
        self.pending_notes.as_deref()
    }

    pub fn capture_notes(&mut self, notes: Option<String>) {
        self.pending_notes = notes;
    }

    /// Whether the call still holds engine resources.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state != CallState::Ended
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::SecretString;

    fn session() -> CallSession {
        CallSession::new(
            CallId::new("booking-1"),
            Role::Clinician,
            ChannelCredentials {
                token: SecretString::from("tok"),
                channel_name: "consult-1".to_string(),
                uid: Uid(7),
            },
            1800,
            300,
        )
    }

    #[test]
    fn test_new_session_defaults() {
        let session = session();
        assert_eq!(session.state(), CallState::Idle);
        assert_eq!(session.role(), Role::Clinician);
        assert_eq!(session.countdown().remaining(), 1800);
        assert!(!session.countdown().is_running());
        assert!(session.remote_participants().is_empty());
        assert_eq!(session.network_quality(), NetworkQuality::Unknown);
        assert!(!session.is_reconnecting());
        assert!(!session.is_awaiting_notes());
    }

    #[test]
    fn test_valid_transitions() {
        let mut session = session();
        assert!(session.transition_to(CallState::Connecting));
        assert!(session.transition_to(CallState::Connected));
        assert!(session.transition_to(CallState::Disconnected));
        assert!(session.transition_to(CallState::Connected));
        assert!(session.transition_to(CallState::Ended));
        assert!(!session.is_active());
    }

    #[test]
    fn test_cannot_skip_connecting() {
        let mut session = session();
        assert!(!session.transition_to(CallState::Connected));
        assert!(!session.transition_to(CallState::Disconnected));
        assert_eq!(session.state(), CallState::Idle);
    }

    #[test]
    fn test_ended_reachable_from_any_state_and_final() {
        for path in [
            vec![],
            vec![CallState::Connecting],
            vec![CallState::Connecting, CallState::Connected],
            vec![CallState::Connecting, CallState::Disconnected],
        ] {
            let mut session = session();
            for state in path {
                assert!(session.transition_to(state));
            }
            assert!(session.transition_to(CallState::Ended));

            for to in [
                CallState::Idle,
                CallState::Connecting,
                CallState::Connected,
                CallState::Disconnected,
            ] {
                assert!(!session.transition_to(to));
            }
            assert_eq!(session.state(), CallState::Ended);
        }
    }

    #[test]
    fn test_repeated_join_is_idempotent() {
        let mut session = session();
        assert!(session.add_participant(Uid(42)));
        assert!(!session.add_participant(Uid(42)));
        assert!(!session.add_participant(Uid(42)));

        assert_eq!(session.remote_participants().len(), 1);
        assert!(session.remote_participants().contains(&Uid(42)));
    }

    #[test]
    fn test_unknown_leave_is_noop() {
        let mut session = session();
        session.add_participant(Uid(1));

        assert!(!session.remove_participant(Uid(2)));
        assert_eq!(session.remote_participants().len(), 1);

        assert!(session.remove_participant(Uid(1)));
        assert!(session.remote_participants().is_empty());
    }

    #[test]
    fn test_remote_media_cleared_on_leave() {
        let mut session = session();
        session.add_participant(Uid(5));
        session.set_remote_audio_muted(Uid(5), true);
        session.set_remote_video_muted(Uid(5), true);

        assert_eq!(
            session.remote_media().get(&Uid(5)),
            Some(&RemoteMedia {
                audio_muted: true,
                video_muted: true
            })
        );

        session.remove_participant(Uid(5));
        assert!(session.remote_media().is_empty());
    }

    #[test]
    fn test_clear_participants_drops_media() {
        let mut session = session();
        session.add_participant(Uid(5));
        session.add_participant(Uid(6));
        session.set_remote_video_muted(Uid(5), true);

        assert_eq!(session.clear_participants(), vec![Uid(5), Uid(6)]);
        assert!(session.remote_participants().is_empty());
        assert!(session.remote_media().is_empty());
        assert!(session.clear_participants().is_empty());
    }

    #[test]
    fn test_remote_media_ignored_for_unknown_participant() {
        let mut session = session();
        assert!(!session.set_remote_video_muted(Uid(9), true));
        assert!(session.remote_media().is_empty());
    }

    #[test]
    fn test_network_quality_keeps_worse_direction() {
        let mut session = session();
        session.record_network_quality(NetworkQuality::Excellent, NetworkQuality::Poor);
        assert_eq!(session.network_quality(), NetworkQuality::Poor);

        session.record_network_quality(NetworkQuality::Good, NetworkQuality::Good);
        assert_eq!(session.network_quality(), NetworkQuality::Good);
    }

    #[test]
    fn test_reconnect_attempts_reset_when_cleared() {
        let mut session = session();
        session.begin_reconnecting();
        assert!(session.is_reconnecting());
        assert_eq!(session.next_reconnect_attempt(), 1);
        assert_eq!(session.next_reconnect_attempt(), 2);

        session.finish_reconnecting();
        assert!(!session.is_reconnecting());
        session.begin_reconnecting();
        assert_eq!(session.next_reconnect_attempt(), 1);
    }
}
