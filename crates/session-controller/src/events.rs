//! Event bridge between the media engine adapter and the session controller.
//!
//! The adapter translates engine callbacks into [`SessionEvent`]s and pushes
//! them through an [`EventSender`]. The controller actor owns the single
//! [`EventReceiver`] and applies events one at a time, in emission order.
//!
//! Engine callbacks are synchronous and cannot wait for capacity, so the
//! bridge is an unbounded `mpsc` channel; the controller drains it on every
//! iteration of its run loop.

use common::types::Uid;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Link state reported by the engine for the local connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// Map the engine's integer connection state.
    #[must_use]
    pub fn from_engine_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ConnectionState::Disconnected),
            2 => Some(ConnectionState::Connecting),
            3 => Some(ConnectionState::Connected),
            4 => Some(ConnectionState::Reconnecting),
            5 => Some(ConnectionState::Failed),
            _ => None,
        }
    }

    /// Whether the local link is lost.
    #[must_use]
    pub const fn is_lost(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

/// Why the connection state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionChangeReason {
    Connecting,
    JoinSuccess,
    Interrupted,
    BannedByServer,
    JoinFailed,
    LeaveChannel,
    InvalidToken,
    TokenExpired,
    RejectedByServer,
    RenewToken,
    ClientIpChanged,
    KeepAliveTimeout,
    Other(i32),
}

impl ConnectionChangeReason {
    /// Map the engine's integer reason code.
    #[must_use]
    pub fn from_engine_code(code: i32) -> Self {
        match code {
            0 => ConnectionChangeReason::Connecting,
            1 => ConnectionChangeReason::JoinSuccess,
            2 => ConnectionChangeReason::Interrupted,
            3 => ConnectionChangeReason::BannedByServer,
            4 => ConnectionChangeReason::JoinFailed,
            5 => ConnectionChangeReason::LeaveChannel,
            8 => ConnectionChangeReason::InvalidToken,
            9 => ConnectionChangeReason::TokenExpired,
            10 => ConnectionChangeReason::RejectedByServer,
            12 => ConnectionChangeReason::RenewToken,
            13 => ConnectionChangeReason::ClientIpChanged,
            14 => ConnectionChangeReason::KeepAliveTimeout,
            other => ConnectionChangeReason::Other(other),
        }
    }
}

/// Link quality, ordered from no information to no link.
///
/// The derived `Ord` follows declaration order, so the worse of two
/// readings is simply their `max`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NetworkQuality {
    #[default]
    Unknown,
    Excellent,
    Good,
    Poor,
    VeryPoor,
    Disconnected,
}

impl NetworkQuality {
    /// Map the engine's 0..=6 quality scale.
    #[must_use]
    pub fn from_engine_level(level: i32) -> Self {
        match level {
            1 => NetworkQuality::Excellent,
            2 => NetworkQuality::Good,
            3 => NetworkQuality::Poor,
            4 | 5 => NetworkQuality::VeryPoor,
            6 => NetworkQuality::Disconnected,
            _ => NetworkQuality::Unknown,
        }
    }

    /// The worse of a transmit and a receive reading.
    #[must_use]
    pub fn worst(tx: Self, rx: Self) -> Self {
        tx.max(rx)
    }
}

/// Notifications delivered from the adapter to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ParticipantJoined(Uid),
    ParticipantLeft(Uid),
    ConnectionStateChanged {
        state: ConnectionState,
        reason: ConnectionChangeReason,
    },
    NetworkQuality {
        uid: Uid,
        tx: NetworkQuality,
        rx: NetworkQuality,
    },
    TokenAboutToExpire,
    RemoteAudioMuted {
        uid: Uid,
        muted: bool,
    },
    RemoteVideoMuted {
        uid: Uid,
        muted: bool,
    },
}

impl SessionEvent {
    /// Bounded label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            SessionEvent::ParticipantJoined(_) => "participant_joined",
            SessionEvent::ParticipantLeft(_) => "participant_left",
            SessionEvent::ConnectionStateChanged { .. } => "connection_state_changed",
            SessionEvent::NetworkQuality { .. } => "network_quality",
            SessionEvent::TokenAboutToExpire => "token_about_to_expire",
            SessionEvent::RemoteAudioMuted { .. } => "remote_audio_muted",
            SessionEvent::RemoteVideoMuted { .. } => "remote_video_muted",
        }
    }
}

/// Create a connected sender/receiver pair.
#[must_use]
pub fn event_bridge() -> (EventSender, EventReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventSender { sender }, EventReceiver { receiver })
}

/// Producer side of the bridge, held by the engine callback sink.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSender {
    /// Emit an event. Returns false once the controller is gone.
    pub fn emit(&self, event: SessionEvent) -> bool {
        let kind = event.kind();
        if self.sender.send(event).is_err() {
            debug!(
                target: "session.events",
                kind,
                "Event dropped, controller no longer listening"
            );
            return false;
        }
        true
    }

    /// Whether the consuming side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Consumer side of the bridge, owned by the controller actor.
#[derive(Debug)]
pub struct EventReceiver {
    receiver: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventReceiver {
    /// Wait for the next event. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.receiver.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.receiver.try_recv().ok()
    }
}
