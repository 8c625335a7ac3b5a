//! A spawned session controller wired to mock collaborators.
//!
//! Intended for `#[tokio::test(start_paused = true)]`: the countdown and
//! reconnection backoff run on tokio time, so tests advance the clock
//! instead of sleeping.

use crate::fixtures::{test_engine_config, test_settings, TestCall};
use common::types::Uid;
use session_controller::config::CallSettings;
use session_controller::engine::mock::{EngineCommand, MockMediaEngine};
use session_controller::engine::{EngineCallback, EngineConfig};
use session_controller::services::session_api::mock::MockSessionApi;
use session_controller::{
    CallError, NavigationIntent, SessionControllerHandle, SessionMetrics, SessionSnapshot,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Engine connection state code for "disconnected".
pub const ENGINE_STATE_DISCONNECTED: i32 = 1;
/// Engine connection state code for "connected".
pub const ENGINE_STATE_CONNECTED: i32 = 3;
/// Engine reason code for an interrupted link.
pub const ENGINE_REASON_INTERRUPTED: i32 = 2;

/// Builder for [`SessionHarness`].
pub struct SessionHarnessBuilder {
    engine: Arc<MockMediaEngine>,
    api: Arc<MockSessionApi>,
    engine_config: EngineConfig,
    settings: CallSettings,
}

impl SessionHarnessBuilder {
    /// Use a pre-scripted engine.
    #[must_use]
    pub fn engine(mut self, engine: Arc<MockMediaEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Use a pre-scripted session API.
    #[must_use]
    pub fn api(mut self, api: MockSessionApi) -> Self {
        self.api = Arc::new(api);
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: CallSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn engine_config(mut self, engine_config: EngineConfig) -> Self {
        self.engine_config = engine_config;
        self
    }

    /// Spawn the controller. Must be called inside a tokio runtime.
    #[must_use]
    pub fn build(self) -> SessionHarness {
        let metrics = SessionMetrics::new();
        let (handle, task) = SessionControllerHandle::spawn(
            self.engine.clone(),
            self.api.clone(),
            self.engine_config,
            self.settings,
            Arc::clone(&metrics),
            CancellationToken::new(),
        );
        let snapshots = handle.subscribe();

        SessionHarness {
            handle,
            task,
            engine: self.engine,
            api: self.api,
            metrics,
            snapshots,
        }
    }
}

/// A running controller plus the mocks behind it.
pub struct SessionHarness {
    pub handle: SessionControllerHandle,
    pub task: JoinHandle<()>,
    pub engine: Arc<MockMediaEngine>,
    pub api: Arc<MockSessionApi>,
    pub metrics: Arc<SessionMetrics>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHarness {
    /// Builder with an accepting engine and API and [`test_settings`].
    #[must_use]
    pub fn builder() -> SessionHarnessBuilder {
        SessionHarnessBuilder {
            engine: MockMediaEngine::new(),
            api: Arc::new(MockSessionApi::accepting()),
            engine_config: test_engine_config(),
            settings: test_settings(),
        }
    }

    /// Start `call` with its fixture credentials.
    pub async fn start(&self, call: &TestCall) -> Result<NavigationIntent, CallError> {
        self.handle
            .start_call(call.call_id.clone(), call.role, call.credentials())
            .await
    }

    /// Wait until a published snapshot satisfies `predicate` and return it.
    ///
    /// # Panics
    ///
    /// Panics if the controller stops before the predicate holds.
    pub async fn wait_for(&self, predicate: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(predicate)
            .await
            .expect("controller stopped before the expected snapshot")
            .clone();
        snapshot
    }

    /// Deliver a raw engine callback.
    ///
    /// # Panics
    ///
    /// Panics if the engine has not been initialized by the controller.
    pub fn emit(&self, callback: EngineCallback) {
        assert!(
            self.engine.emit(callback),
            "engine has no callback sink; start a call first"
        );
    }

    /// Simulate the link dropping.
    pub fn drop_connection(&self) {
        self.emit(EngineCallback::ConnectionStateChanged {
            state: ENGINE_STATE_DISCONNECTED,
            reason: ENGINE_REASON_INTERRUPTED,
        });
    }

    /// Simulate the far side joining as `uid`.
    pub fn remote_joins(&self, uid: Uid) {
        self.emit(EngineCallback::UserJoined { uid });
    }

    /// Number of join commands the engine has received.
    #[must_use]
    pub fn join_count(&self) -> usize {
        self.engine
            .count(|c| matches!(c, EngineCommand::JoinChannel { .. }))
    }

    /// Number of leave commands the engine has received.
    #[must_use]
    pub fn leave_count(&self) -> usize {
        self.engine
            .count(|c| matches!(c, EngineCommand::LeaveChannel))
    }
}
