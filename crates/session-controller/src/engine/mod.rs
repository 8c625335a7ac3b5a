//! Media engine boundary.
//!
//! [`MediaEngine`] is the command surface of the external audio/video engine.
//! Implementations wrap a vendor SDK and are expected to use interior
//! mutability (SDK handles are thread-safe), which is why every method takes
//! `&self`. Engine results use the SDK's integer error codes.
//!
//! The engine reports asynchronously through raw [`EngineCallback`]s handed
//! to the [`CallbackSink`] it receives at initialization; the sink turns them
//! into [`crate::events::SessionEvent`]s.
//!
//! Application code never talks to a `MediaEngine` directly: the
//! [`MediaEngineAdapter`] owns the initialization ordering, deferred surface
//! binding and mute bookkeeping.

pub mod adapter;
pub mod mock;

pub use adapter::{CallbackSink, JoinFuture, MediaEngineAdapter, SurfaceBinding};

use async_trait::async_trait;
use common::types::{SurfaceHandle, Uid};

/// Engine error code for an expired channel token.
pub const ERR_TOKEN_EXPIRED: i32 = 109;

/// Engine error code for an invalid channel token.
pub const ERR_INVALID_TOKEN: i32 = 110;

/// Channel profile. Consultations always use two-party communication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelProfile {
    Communication,
}

/// Publishing role inside a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    /// Publishes and subscribes.
    Broadcaster,
}

/// Bounded encoder settings applied once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoEncoderProfile {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate_kbps: u32,
}

impl Default for VideoEncoderProfile {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            frame_rate: 15,
            bitrate_kbps: 400,
        }
    }
}

/// Everything the adapter needs to bring an engine up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub app_id: String,
    pub video_profile: VideoEncoderProfile,
    /// Device has no camera (simulator/emulator): never publish a camera track.
    pub simulated_device: bool,
}

/// Per-join publish/subscribe options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMediaOptions {
    pub client_role: ClientRole,
    pub publish_camera_track: bool,
    pub publish_microphone_track: bool,
    pub auto_subscribe_audio: bool,
    pub auto_subscribe_video: bool,
}

impl ChannelMediaOptions {
    /// Full two-way participant; camera publishing follows `publish_camera`.
    #[must_use]
    pub fn participant(publish_camera: bool) -> Self {
        Self {
            client_role: ClientRole::Broadcaster,
            publish_camera_track: publish_camera,
            publish_microphone_track: true,
            auto_subscribe_audio: true,
            auto_subscribe_video: true,
        }
    }
}

/// Raw, integer-coded notifications from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCallback {
    JoinChannelSuccess { channel: String, uid: Uid },
    UserJoined { uid: Uid },
    UserOffline { uid: Uid, reason: i32 },
    ConnectionStateChanged { state: i32, reason: i32 },
    NetworkQuality { uid: Uid, tx_quality: i32, rx_quality: i32 },
    TokenPrivilegeWillExpire,
    UserMuteAudio { uid: Uid, muted: bool },
    UserMuteVideo { uid: Uid, muted: bool },
    Warning { code: i32 },
    Error { code: i32 },
}

/// Command surface of the external media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create the native engine and register the callback sink.
    fn initialize(&self, app_id: &str, profile: ChannelProfile, sink: CallbackSink)
        -> Result<(), i32>;

    fn enable_audio(&self) -> Result<(), i32>;

    fn enable_video(&self) -> Result<(), i32>;

    fn set_video_encoder(&self, profile: &VideoEncoderProfile) -> Result<(), i32>;

    fn set_client_role(&self, role: ClientRole) -> Result<(), i32>;

    fn start_preview(&self) -> Result<(), i32>;

    fn stop_preview(&self);

    /// Join a channel; resolves with the uid the engine joined under.
    async fn join_channel(
        &self,
        token: &str,
        channel_name: &str,
        uid: Uid,
        options: ChannelMediaOptions,
    ) -> Result<Uid, i32>;

    fn leave_channel(&self) -> Result<(), i32>;

    fn renew_token(&self, token: &str) -> Result<(), i32>;

    fn mute_local_audio(&self, muted: bool) -> Result<(), i32>;

    /// Turn the capture device on or off (not just the outbound stream).
    fn enable_local_video(&self, enabled: bool) -> Result<(), i32>;

    fn switch_camera(&self) -> Result<(), i32>;

    fn setup_local_video(&self, surface: SurfaceHandle) -> Result<(), i32>;

    fn setup_remote_video(&self, surface: SurfaceHandle, uid: Uid) -> Result<(), i32>;

    /// Release all native resources.
    fn release(&self);
}
