//! Message and view types for the session controller actor.
//!
//! Requests use `tokio::sync::mpsc` with `tokio::sync::oneshot` replies.
//! State flows back out through a `tokio::sync::watch` of [`SessionSnapshot`].

use super::session::{CallState, ChannelCredentials, RemoteMedia};
use crate::errors::CallError;
use crate::events::NetworkQuality;
use crate::policy::Role;

use common::types::{CallId, SurfaceHandle, Uid};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::oneshot;

/// Where the UI should be. The controller never navigates itself; the
/// composition root acts on this value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationIntent {
    /// Show the in-call screen.
    ShowCall,
    /// Time is up; collect the clinician's notes, then call `end_call`.
    CollectNotes,
    /// Leave the call UI.
    #[default]
    ReturnHome,
}

/// Messages sent to `SessionControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Start a call. Credentials are issued by the session API when absent.
    StartCall {
        call_id: CallId,
        role: Role,
        credentials: Option<ChannelCredentials>,
        respond_to: oneshot::Sender<Result<NavigationIntent, CallError>>,
    },

    /// End the active call, persisting notes where the role's policy says so.
    EndCall {
        notes: Option<String>,
        respond_to: oneshot::Sender<Result<NavigationIntent, CallError>>,
    },

    /// Flip the local microphone mute; replies with the new flag.
    ToggleLocalAudio { respond_to: oneshot::Sender<bool> },

    /// Flip the local camera; replies with the new flag.
    ToggleLocalVideo { respond_to: oneshot::Sender<bool> },

    SwitchCamera {
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    BindLocalSurface {
        surface: SurfaceHandle,
        respond_to: oneshot::Sender<()>,
    },

    BindRemoteSurface {
        surface: SurfaceHandle,
        uid: Uid,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Run the reconnection path on demand.
    RetryConnection {
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// The UI has shown the current error.
    AcknowledgeError,

    GetSnapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
}

/// Read-only view of the controller, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub call_id: Option<CallId>,
    pub role: Option<Role>,
    pub state: CallState,
    pub remaining_seconds: u32,
    pub low_time_warning: bool,
    pub remote_participants: Vec<Uid>,
    pub remote_media: BTreeMap<Uid, RemoteMedia>,
    pub local_audio_muted: bool,
    pub local_video_muted: bool,
    pub network_quality: NetworkQuality,
    pub reconnecting: bool,
    pub awaiting_notes: bool,
    /// User-presentable message for the most recent error.
    pub last_error: Option<String>,
    pub error_visible: bool,
    pub navigation: NavigationIntent,
}

impl SessionSnapshot {
    /// Whether a call is in progress (started and not ended).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.call_id.is_some() && !matches!(self.state, CallState::Idle | CallState::Ended)
    }
}
