//! `MediaEngineAdapter` - the single point of contact with the media engine.
//!
//! The adapter:
//! - Brings the engine up in a fixed order (communication profile, audio,
//!   video, encoder profile, broadcaster role) and tears it down again
//! - Turns joins into `'static` futures so the controller can keep handling
//!   events while a join is in flight
//! - Tracks local mute flags; muting video disables the capture device
//! - Holds a local surface bound before initialization and applies it once
//!   the engine is ready
//! - Translates raw engine callbacks into [`SessionEvent`]s (via [`CallbackSink`])

use super::{
    ChannelMediaOptions, ChannelProfile, ClientRole, EngineCallback, EngineConfig, MediaEngine,
    ERR_INVALID_TOKEN, ERR_TOKEN_EXPIRED,
};
use crate::errors::CallError;
use crate::events::{
    ConnectionChangeReason, ConnectionState, EventSender, NetworkQuality, SessionEvent,
};

use common::secret::{ExposeSecret, SecretString};
use common::types::{SurfaceHandle, Uid};
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Future returned by [`MediaEngineAdapter::join_channel`].
pub type JoinFuture = BoxFuture<'static, Result<Uid, CallError>>;

/// Local rendering target state.
///
/// Only the most recent request is kept: binding again while `Pending`
/// replaces the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceBinding {
    #[default]
    Unbound,
    /// Requested before the engine was ready; applied on initialization.
    Pending(SurfaceHandle),
    Bound(SurfaceHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelStatus {
    Idle,
    Joining,
    Joined,
}

/// Lifecycle wrapper around one engine instance.
pub struct MediaEngineAdapter {
    engine: Arc<dyn MediaEngine>,
    config: EngineConfig,
    events: EventSender,
    initialized: bool,
    channel: ChannelStatus,
    local_surface: SurfaceBinding,
    remote_surfaces: HashMap<Uid, SurfaceHandle>,
    audio_muted: bool,
    video_muted: bool,
}

impl MediaEngineAdapter {
    /// Wrap an engine. Nothing is sent to the engine until
    /// [`initialize_engine`](Self::initialize_engine).
    #[must_use]
    pub fn new(engine: Arc<dyn MediaEngine>, config: EngineConfig, events: EventSender) -> Self {
        Self {
            engine,
            config,
            events,
            initialized: false,
            channel: ChannelStatus::Idle,
            local_surface: SurfaceBinding::Unbound,
            remote_surfaces: HashMap::new(),
            audio_muted: false,
            video_muted: false,
        }
    }

    /// Bring the engine up. Calling this again while initialized is a no-op.
    pub fn initialize_engine(&mut self) -> Result<(), CallError> {
        if self.initialized {
            warn!(
                target: "session.engine.adapter",
                "Engine already initialized, ignoring"
            );
            return Ok(());
        }

        let sink = CallbackSink::new(self.events.clone());
        self.engine
            .initialize(&self.config.app_id, ChannelProfile::Communication, sink)
            .map_err(|code| init_error("initialize", code))?;
        self.engine
            .enable_audio()
            .map_err(|code| init_error("enable_audio", code))?;
        self.engine
            .enable_video()
            .map_err(|code| init_error("enable_video", code))?;
        self.engine
            .set_video_encoder(&self.config.video_profile)
            .map_err(|code| init_error("set_video_encoder", code))?;
        self.engine
            .set_client_role(ClientRole::Broadcaster)
            .map_err(|code| init_error("set_client_role", code))?;

        self.initialized = true;

        // Mute toggles made before the engine existed
        if self.audio_muted {
            self.apply_audio_mute();
        }
        if self.video_muted {
            self.apply_video_capture();
        }

        if let SurfaceBinding::Pending(surface) = self.local_surface {
            debug!(
                target: "session.engine.adapter",
                surface = surface.0,
                "Applying deferred local surface binding"
            );
            self.apply_local_surface(surface);
        }

        info!(
            target: "session.engine.adapter",
            simulated_device = self.config.simulated_device,
            width = self.config.video_profile.width,
            height = self.config.video_profile.height,
            "Media engine initialized"
        );

        Ok(())
    }

    /// Start preview and join `channel_name`.
    ///
    /// The returned future owns everything it needs, so the caller can drive
    /// it from a spawned task. Fails with `EngineNotInitialized` before
    /// [`initialize_engine`](Self::initialize_engine) and with
    /// `JoinFailed(code)` when the engine rejects the join.
    pub fn join_channel(&mut self, token: &SecretString, channel_name: &str, uid: Uid) -> JoinFuture {
        if !self.initialized {
            warn!(
                target: "session.engine.adapter",
                "Join requested before engine initialization"
            );
            return future::ready(Err(CallError::EngineNotInitialized)).boxed();
        }

        if let Err(code) = self.engine.start_preview() {
            // Preview failure does not prevent joining audio-only
            warn!(
                target: "session.engine.adapter",
                code,
                "Failed to start local preview"
            );
        }

        let options = ChannelMediaOptions::participant(!self.config.simulated_device);
        self.channel = ChannelStatus::Joining;

        debug!(
            target: "session.engine.adapter",
            channel_name = %channel_name,
            uid = %uid,
            publish_camera = options.publish_camera_track,
            "Joining channel"
        );

        let engine = Arc::clone(&self.engine);
        let token = token.expose_secret().to_string();
        let channel_name = channel_name.to_string();

        async move {
            engine
                .join_channel(&token, &channel_name, uid, options)
                .await
                .map_err(CallError::JoinFailed)
        }
        .boxed()
    }

    /// Record the outcome of a join future produced by this adapter.
    pub fn on_join_result(&mut self, result: &Result<Uid, CallError>) {
        if self.channel != ChannelStatus::Joining {
            return;
        }
        self.channel = match result {
            Ok(_) => ChannelStatus::Joined,
            Err(_) => ChannelStatus::Idle,
        };
    }

    /// Stop preview and leave the channel. A no-op when not in a channel.
    pub fn leave_channel(&mut self) {
        if !self.initialized || self.channel == ChannelStatus::Idle {
            debug!(
                target: "session.engine.adapter",
                "Leave requested while not in a channel, ignoring"
            );
            return;
        }

        self.engine.stop_preview();
        if let Err(code) = self.engine.leave_channel() {
            warn!(
                target: "session.engine.adapter",
                code,
                "Engine reported an error leaving the channel"
            );
        }
        self.channel = ChannelStatus::Idle;
        self.remote_surfaces.clear();

        debug!(target: "session.engine.adapter", "Left channel");
    }

    /// Swap the channel credential without leaving.
    pub fn renew_token(&mut self, token: &SecretString) -> Result<(), CallError> {
        if !self.initialized {
            return Err(CallError::EngineNotInitialized);
        }
        self.engine
            .renew_token(token.expose_secret())
            .map_err(|code| {
                warn!(
                    target: "session.engine.adapter",
                    code,
                    "Engine rejected renewed token"
                );
                CallError::TokenIssuanceFailed(format!("engine rejected renewed token ({code})"))
            })?;
        debug!(target: "session.engine.adapter", "Channel token renewed");
        Ok(())
    }

    /// Release the engine. The adapter must be re-initialized before reuse;
    /// mute flags and surface bindings start over.
    pub fn destroy(&mut self) {
        if !self.initialized {
            debug!(
                target: "session.engine.adapter",
                "Destroy requested on uninitialized engine, ignoring"
            );
            return;
        }

        self.leave_channel();
        self.engine.release();
        self.initialized = false;
        self.local_surface = SurfaceBinding::Unbound;
        self.remote_surfaces.clear();
        self.audio_muted = false;
        self.video_muted = false;

        info!(target: "session.engine.adapter", "Media engine destroyed");
    }

    /// Flip the local microphone mute. Returns the new muted flag.
    pub fn toggle_local_audio(&mut self) -> bool {
        self.audio_muted = !self.audio_muted;
        if self.initialized {
            self.apply_audio_mute();
        }
        self.audio_muted
    }

    /// Flip the local camera. Muting disables the capture device itself.
    /// Returns the new muted flag.
    pub fn toggle_local_video(&mut self) -> bool {
        self.video_muted = !self.video_muted;
        if self.initialized {
            self.apply_video_capture();
        }
        self.video_muted
    }

    /// Switch between front and back cameras.
    pub fn switch_camera(&mut self) -> Result<(), CallError> {
        if !self.initialized {
            return Err(CallError::EngineNotInitialized);
        }
        if self.video_muted || self.config.simulated_device {
            debug!(
                target: "session.engine.adapter",
                "Camera switch skipped, capture is off"
            );
            return Ok(());
        }
        self.engine
            .switch_camera()
            .map_err(|code| CallError::Internal(format!("switch_camera failed ({code})")))
    }

    /// Register the local preview target, deferring it until the engine is
    /// ready if necessary.
    pub fn bind_local_surface(&mut self, surface: SurfaceHandle) {
        if self.initialized {
            self.apply_local_surface(surface);
        } else {
            debug!(
                target: "session.engine.adapter",
                surface = surface.0,
                "Engine not ready, deferring local surface binding"
            );
            self.local_surface = SurfaceBinding::Pending(surface);
        }
    }

    /// Register the rendering target for a remote participant.
    pub fn bind_remote_surface(&mut self, surface: SurfaceHandle, uid: Uid) -> Result<(), CallError> {
        if !self.initialized {
            return Err(CallError::EngineNotInitialized);
        }
        if let Err(code) = self.engine.setup_remote_video(surface, uid) {
            warn!(
                target: "session.engine.adapter",
                code,
                uid = %uid,
                "Failed to bind remote surface"
            );
        }
        self.remote_surfaces.insert(uid, surface);
        Ok(())
    }

    /// Forget the surface of a participant that left.
    pub fn release_remote_surface(&mut self, uid: Uid) {
        self.remote_surfaces.remove(&uid);
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[must_use]
    pub fn is_in_channel(&self) -> bool {
        self.channel != ChannelStatus::Idle
    }

    #[must_use]
    pub fn local_surface(&self) -> SurfaceBinding {
        self.local_surface
    }

    #[must_use]
    pub fn remote_surface(&self, uid: Uid) -> Option<SurfaceHandle> {
        self.remote_surfaces.get(&uid).copied()
    }

    #[must_use]
    pub fn local_audio_muted(&self) -> bool {
        self.audio_muted
    }

    #[must_use]
    pub fn local_video_muted(&self) -> bool {
        self.video_muted
    }

    fn apply_local_surface(&mut self, surface: SurfaceHandle) {
        if let Err(code) = self.engine.setup_local_video(surface) {
            warn!(
                target: "session.engine.adapter",
                code,
                "Failed to bind local surface"
            );
        }
        self.local_surface = SurfaceBinding::Bound(surface);
    }

    fn apply_audio_mute(&self) {
        if let Err(code) = self.engine.mute_local_audio(self.audio_muted) {
            warn!(target: "session.engine.adapter", code, "Failed to apply audio mute");
        }
    }

    fn apply_video_capture(&self) {
        if let Err(code) = self.engine.enable_local_video(!self.video_muted) {
            warn!(target: "session.engine.adapter", code, "Failed to toggle video capture");
        }
    }
}

impl Drop for MediaEngineAdapter {
    fn drop(&mut self) {
        if self.initialized {
            self.engine.release();
        }
    }
}

fn init_error(step: &str, code: i32) -> CallError {
    error!(
        target: "session.engine.adapter",
        step,
        code,
        "Engine initialization step failed"
    );
    CallError::Internal(format!("engine {step} failed ({code})"))
}

/// Receives raw engine callbacks and forwards them onto the event bridge.
#[derive(Clone, Debug)]
pub struct CallbackSink {
    events: EventSender,
}

impl CallbackSink {
    #[must_use]
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    /// Deliver one engine callback. Safe to call from any engine thread.
    pub fn deliver(&self, callback: EngineCallback) {
        if let Some(event) = Self::translate(callback) {
            self.events.emit(event);
        }
    }

    /// Map a raw callback to a session event. Warnings, errors and
    /// informational callbacks are logged and produce nothing.
    #[must_use]
    pub fn translate(callback: EngineCallback) -> Option<SessionEvent> {
        match callback {
            EngineCallback::JoinChannelSuccess { channel, uid } => {
                debug!(
                    target: "session.engine.callbacks",
                    channel = %channel,
                    uid = %uid,
                    "Engine confirmed channel join"
                );
                None
            }
            EngineCallback::UserJoined { uid } => Some(SessionEvent::ParticipantJoined(uid)),
            EngineCallback::UserOffline { uid, reason } => {
                debug!(
                    target: "session.engine.callbacks",
                    uid = %uid,
                    reason,
                    "Remote user offline"
                );
                Some(SessionEvent::ParticipantLeft(uid))
            }
            EngineCallback::ConnectionStateChanged { state, reason } => {
                let Some(state) = ConnectionState::from_engine_code(state) else {
                    warn!(
                        target: "session.engine.callbacks",
                        state,
                        reason,
                        "Unknown connection state from engine"
                    );
                    return None;
                };
                Some(SessionEvent::ConnectionStateChanged {
                    state,
                    reason: ConnectionChangeReason::from_engine_code(reason),
                })
            }
            EngineCallback::NetworkQuality {
                uid,
                tx_quality,
                rx_quality,
            } => Some(SessionEvent::NetworkQuality {
                uid,
                tx: NetworkQuality::from_engine_level(tx_quality),
                rx: NetworkQuality::from_engine_level(rx_quality),
            }),
            EngineCallback::TokenPrivilegeWillExpire => Some(SessionEvent::TokenAboutToExpire),
            EngineCallback::UserMuteAudio { uid, muted } => {
                Some(SessionEvent::RemoteAudioMuted { uid, muted })
            }
            EngineCallback::UserMuteVideo { uid, muted } => {
                Some(SessionEvent::RemoteVideoMuted { uid, muted })
            }
            EngineCallback::Warning { code } => {
                warn!(target: "session.engine.callbacks", code, "Engine warning");
                None
            }
            EngineCallback::Error { code } => {
                error!(target: "session.engine.callbacks", code, "Engine error");
                // Credential errors mean the link is gone
                let reason = match code {
                    ERR_TOKEN_EXPIRED => ConnectionChangeReason::TokenExpired,
                    ERR_INVALID_TOKEN => ConnectionChangeReason::InvalidToken,
                    _ => return None,
                };
                Some(SessionEvent::ConnectionStateChanged {
                    state: ConnectionState::Failed,
                    reason,
                })
            }
        }
    }
}
