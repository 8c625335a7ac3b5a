//! Scriptable in-memory [`MediaEngine`] for tests and local development.
//!
//! Every command is recorded as an [`EngineCommand`]. Join results can be
//! queued ahead of time (otherwise joins succeed with the requested uid) and
//! joins can be slowed down to exercise in-flight behavior. The callback sink
//! captured at initialization is exposed through [`MockMediaEngine::emit`] so
//! tests can play the engine's side of the conversation.

use super::{
    CallbackSink, ChannelMediaOptions, ChannelProfile, ClientRole, EngineCallback, MediaEngine,
    VideoEncoderProfile,
};
use common::types::{SurfaceHandle, Uid};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A command received by the mock engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Initialize {
        app_id: String,
        profile: ChannelProfile,
    },
    EnableAudio,
    EnableVideo,
    SetVideoEncoder(VideoEncoderProfile),
    SetClientRole(ClientRole),
    StartPreview,
    StopPreview,
    JoinChannel {
        token: String,
        channel_name: String,
        uid: Uid,
        options: ChannelMediaOptions,
    },
    LeaveChannel,
    RenewToken(String),
    MuteLocalAudio(bool),
    EnableLocalVideo(bool),
    SwitchCamera,
    SetupLocalVideo(SurfaceHandle),
    SetupRemoteVideo(SurfaceHandle, Uid),
    Release,
}

#[derive(Default)]
struct MockState {
    commands: Vec<EngineCommand>,
    join_results: VecDeque<Result<Uid, i32>>,
    join_delay: Duration,
    initialize_error: Option<i32>,
    sink: Option<CallbackSink>,
}

/// Mock media engine.
#[derive(Default)]
pub struct MockMediaEngine {
    state: Mutex<MockState>,
}

impl MockMediaEngine {
    /// Create a mock whose joins succeed immediately.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a mock that answers joins with `results`, in order.
    #[must_use]
    pub fn with_join_results(results: Vec<Result<Uid, i32>>) -> Arc<Self> {
        let engine = Self::new();
        engine.lock().join_results = results.into();
        engine
    }

    /// Queue the result of the next unscripted join.
    pub fn push_join_result(&self, result: Result<Uid, i32>) {
        self.lock().join_results.push_back(result);
    }

    /// Delay applied to every subsequent join.
    pub fn set_join_delay(&self, delay: Duration) {
        self.lock().join_delay = delay;
    }

    /// Make the next `initialize` fail with `code`.
    pub fn fail_initialize(&self, code: i32) {
        self.lock().initialize_error = Some(code);
    }

    /// Deliver a callback as if the engine raised it. Returns false if the
    /// engine was never initialized.
    pub fn emit(&self, callback: EngineCallback) -> bool {
        let sink = self.lock().sink.clone();
        match sink {
            Some(sink) => {
                sink.deliver(callback);
                true
            }
            None => false,
        }
    }

    /// All commands received so far.
    #[must_use]
    pub fn commands(&self) -> Vec<EngineCommand> {
        self.lock().commands.clone()
    }

    /// Number of recorded commands matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&EngineCommand) -> bool) -> usize {
        self.lock().commands.iter().filter(|c| predicate(c)).count()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, command: EngineCommand) {
        self.lock().commands.push(command);
    }
}

#[async_trait::async_trait]
impl MediaEngine for MockMediaEngine {
    fn initialize(
        &self,
        app_id: &str,
        profile: ChannelProfile,
        sink: CallbackSink,
    ) -> Result<(), i32> {
        let mut state = self.lock();
        state.commands.push(EngineCommand::Initialize {
            app_id: app_id.to_string(),
            profile,
        });
        if let Some(code) = state.initialize_error.take() {
            return Err(code);
        }
        state.sink = Some(sink);
        Ok(())
    }

    fn enable_audio(&self) -> Result<(), i32> {
        self.record(EngineCommand::EnableAudio);
        Ok(())
    }

    fn enable_video(&self) -> Result<(), i32> {
        self.record(EngineCommand::EnableVideo);
        Ok(())
    }

    fn set_video_encoder(&self, profile: &VideoEncoderProfile) -> Result<(), i32> {
        self.record(EngineCommand::SetVideoEncoder(*profile));
        Ok(())
    }

    fn set_client_role(&self, role: ClientRole) -> Result<(), i32> {
        self.record(EngineCommand::SetClientRole(role));
        Ok(())
    }

    fn start_preview(&self) -> Result<(), i32> {
        self.record(EngineCommand::StartPreview);
        Ok(())
    }

    fn stop_preview(&self) {
        self.record(EngineCommand::StopPreview);
    }

    async fn join_channel(
        &self,
        token: &str,
        channel_name: &str,
        uid: Uid,
        options: ChannelMediaOptions,
    ) -> Result<Uid, i32> {
        let (delay, result) = {
            let mut state = self.lock();
            state.commands.push(EngineCommand::JoinChannel {
                token: token.to_string(),
                channel_name: channel_name.to_string(),
                uid,
                options,
            });
            let result = state.join_results.pop_front().unwrap_or(Ok(uid));
            (state.join_delay, result)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Ok(joined) = result {
            self.emit(EngineCallback::JoinChannelSuccess {
                channel: channel_name.to_string(),
                uid: joined,
            });
        }
        result
    }

    fn leave_channel(&self) -> Result<(), i32> {
        self.record(EngineCommand::LeaveChannel);
        Ok(())
    }

    fn renew_token(&self, token: &str) -> Result<(), i32> {
        self.record(EngineCommand::RenewToken(token.to_string()));
        Ok(())
    }

    fn mute_local_audio(&self, muted: bool) -> Result<(), i32> {
        self.record(EngineCommand::MuteLocalAudio(muted));
        Ok(())
    }

    fn enable_local_video(&self, enabled: bool) -> Result<(), i32> {
        self.record(EngineCommand::EnableLocalVideo(enabled));
        Ok(())
    }

    fn switch_camera(&self) -> Result<(), i32> {
        self.record(EngineCommand::SwitchCamera);
        Ok(())
    }

    fn setup_local_video(&self, surface: SurfaceHandle) -> Result<(), i32> {
        self.record(EngineCommand::SetupLocalVideo(surface));
        Ok(())
    }

    fn setup_remote_video(&self, surface: SurfaceHandle, uid: Uid) -> Result<(), i32> {
        self.record(EngineCommand::SetupRemoteVideo(surface, uid));
        Ok(())
    }

    fn release(&self) {
        let mut state = self.lock();
        state.commands.push(EngineCommand::Release);
        state.sink = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::{event_bridge, SessionEvent};

    #[tokio::test]
    async fn test_join_defaults_to_requested_uid() {
        let engine = MockMediaEngine::new();
        let result = engine
            .join_channel("tok", "chan", Uid(3), ChannelMediaOptions::participant(true))
            .await;
        assert_eq!(result, Ok(Uid(3)));
        assert_eq!(engine.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_join_results_in_order() {
        let engine = MockMediaEngine::with_join_results(vec![Err(110), Ok(Uid(9))]);
        let options = ChannelMediaOptions::participant(true);

        assert_eq!(
            engine.join_channel("t", "c", Uid(1), options).await,
            Err(110)
        );
        assert_eq!(
            engine.join_channel("t", "c", Uid(1), options).await,
            Ok(Uid(9))
        );
        assert_eq!(
            engine.join_channel("t", "c", Uid(1), options).await,
            Ok(Uid(1))
        );
    }

    #[tokio::test]
    async fn test_emit_requires_initialization() {
        let engine = MockMediaEngine::new();
        assert!(!engine.emit(EngineCallback::UserJoined { uid: Uid(2) }));

        let (events, mut receiver) = event_bridge();
        engine
            .initialize("app", ChannelProfile::Communication, CallbackSink::new(events))
            .unwrap();

        assert!(engine.emit(EngineCallback::UserJoined { uid: Uid(2) }));
        assert_eq!(
            receiver.recv().await,
            Some(SessionEvent::ParticipantJoined(Uid(2)))
        );

        engine.release();
        assert!(!engine.emit(EngineCallback::UserJoined { uid: Uid(2) }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_delay() {
        let engine = MockMediaEngine::new();
        engine.set_join_delay(Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        engine
            .join_channel("t", "c", Uid(1), ChannelMediaOptions::participant(true))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
