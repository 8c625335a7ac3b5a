//! `SessionControllerActor` - single owner of the live consultation.
//!
//! The actor serializes everything that can change a call:
//!
//! - UI commands arriving through [`SessionControllerHandle`]
//! - Engine notifications arriving through the event bridge
//! - The one-second countdown ticker
//! - In-flight connection work (credential issuance, channel join)
//! - In-flight token renewal
//!
//! Long-running work is held as a boxed future and polled from the same
//! `select!` as everything else, so a slow join never blocks `end_call` and
//! the actor never needs a lock. Dropping the slot cancels the work.
//!
//! # Reconnection
//!
//! A lost connection (engine reports `Disconnected` or `Failed`
//! for any reason other than our own leave) starts at most one reconnection
//! sequence. Each attempt issues fresh credentials for the same channel,
//! leaves, then rejoins. While an attempt is in flight further loss events
//! are ignored. When every attempt has failed the countdown is frozen and the
//! error is surfaced; `retry_connection` starts a new sequence.
//!
//! The countdown keeps running while disconnected.
//!
//! # Session API requests made for a command
//!
//! Credentials for `start_call_for_booking` and the notes upload in
//! `end_call` are awaited inside the command, bounded by the HTTP client
//! timeout. Engine events queue on the bridge meanwhile and are applied in
//! order afterwards; cancellation interrupts the request.

use super::messages::{ControllerMessage, NavigationIntent, SessionSnapshot};
use super::metrics::{MailboxMonitor, SessionMetrics};
use super::session::{CallSession, CallState, ChannelCredentials};
use crate::config::{CallSettings, Config};
use crate::countdown::TickOutcome;
use crate::engine::{EngineConfig, JoinFuture, MediaEngine, MediaEngineAdapter};
use crate::errors::CallError;
use crate::events::{
    event_bridge, ConnectionChangeReason, ConnectionState, EventReceiver, SessionEvent,
};
use crate::observability::metrics as prom;
use crate::policy::{ExpiryAction, Role};
use crate::services::{HttpSessionApi, SessionApi};

use common::types::{CallId, SurfaceHandle, Uid};
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 64;

/// Countdown resolution.
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Handle to the `SessionControllerActor`.
///
/// This is the surface the call UI talks to. Commands are async and reply
/// over oneshot channels; state is observed through [`Self::subscribe`].
#[derive(Clone)]
pub struct SessionControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    snapshots: watch::Receiver<SessionSnapshot>,
    cancel_token: CancellationToken,
}

impl SessionControllerHandle {
    /// Spawn the controller actor.
    ///
    /// The actor owns the media engine adapter built from `engine` and
    /// `engine_config`, and stops when `cancel_token` is cancelled or every
    /// handle is dropped. Either way the engine is released.
    #[must_use]
    pub fn spawn(
        engine: Arc<dyn MediaEngine>,
        api: Arc<dyn SessionApi>,
        engine_config: EngineConfig,
        settings: CallSettings,
        metrics: Arc<SessionMetrics>,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let (event_sender, events) = event_bridge();
        let (snapshot_tx, snapshots) = watch::channel(SessionSnapshot {
            remaining_seconds: settings.budget_seconds,
            ..SessionSnapshot::default()
        });

        let actor = SessionControllerActor {
            receiver,
            events,
            cancel_token: cancel_token.clone(),
            adapter: MediaEngineAdapter::new(engine, engine_config, event_sender),
            api,
            settings,
            session: None,
            pending_connect: None,
            pending_renewal: None,
            ticker: None,
            navigation: NavigationIntent::ReturnHome,
            last_error: None,
            error_visible: false,
            snapshot_tx,
            metrics,
            mailbox: MailboxMonitor::new("session-controller"),
        };

        let task = tokio::spawn(actor.run());

        (
            Self {
                sender,
                snapshots,
                cancel_token,
            },
            task,
        )
    }

    /// Spawn the controller against the HTTP session API described by
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Internal` if the HTTP client cannot be built.
    pub fn spawn_with_config(
        config: &Config,
        engine: Arc<dyn MediaEngine>,
        metrics: Arc<SessionMetrics>,
        cancel_token: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>), CallError> {
        let api = HttpSessionApi::new(
            config.session_api_url.clone(),
            config.session_api_token.clone(),
        )?;
        Ok(Self::spawn(
            engine,
            Arc::new(api),
            config.engine_config(),
            config.call_settings(),
            metrics,
            cancel_token,
        ))
    }

    /// Start a call with credentials the caller already holds.
    pub async fn start_call(
        &self,
        call_id: CallId,
        role: Role,
        credentials: ChannelCredentials,
    ) -> Result<NavigationIntent, CallError> {
        self.request(|respond_to| ControllerMessage::StartCall {
            call_id,
            role,
            credentials: Some(credentials),
            respond_to,
        })
        .await?
    }

    /// Start a call for a booking, asking the session API for credentials.
    pub async fn start_call_for_booking(
        &self,
        call_id: CallId,
        role: Role,
    ) -> Result<NavigationIntent, CallError> {
        self.request(|respond_to| ControllerMessage::StartCall {
            call_id,
            role,
            credentials: None,
            respond_to,
        })
        .await?
    }

    /// End the active call. `notes` are persisted when the role's policy
    /// asks for them.
    pub async fn end_call(&self, notes: Option<String>) -> Result<NavigationIntent, CallError> {
        self.request(|respond_to| ControllerMessage::EndCall { notes, respond_to })
            .await?
    }

    /// Flip the microphone mute. Returns the new muted flag.
    pub async fn toggle_local_audio(&self) -> Result<bool, CallError> {
        self.request(|respond_to| ControllerMessage::ToggleLocalAudio { respond_to })
            .await
    }

    /// Flip the camera. Returns the new muted flag.
    pub async fn toggle_local_video(&self) -> Result<bool, CallError> {
        self.request(|respond_to| ControllerMessage::ToggleLocalVideo { respond_to })
            .await
    }

    pub async fn switch_camera(&self) -> Result<(), CallError> {
        self.request(|respond_to| ControllerMessage::SwitchCamera { respond_to })
            .await?
    }

    /// Bind the local preview. Allowed before a call starts; applied once
    /// the engine is initialized.
    pub async fn bind_local_surface(&self, surface: SurfaceHandle) -> Result<(), CallError> {
        self.request(|respond_to| ControllerMessage::BindLocalSurface {
            surface,
            respond_to,
        })
        .await
    }

    pub async fn bind_remote_surface(
        &self,
        surface: SurfaceHandle,
        uid: Uid,
    ) -> Result<(), CallError> {
        self.request(|respond_to| ControllerMessage::BindRemoteSurface {
            surface,
            uid,
            respond_to,
        })
        .await?
    }

    /// Start a new reconnection sequence after the previous one gave up or
    /// the initial join failed.
    pub async fn retry_connection(&self) -> Result<(), CallError> {
        self.request(|respond_to| ControllerMessage::RetryConnection { respond_to })
            .await?
    }

    /// Mark the current error as shown.
    pub async fn acknowledge_error(&self) -> Result<(), CallError> {
        self.sender
            .send(ControllerMessage::AcknowledgeError)
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))
    }

    /// Fetch a consistent snapshot from the actor.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, CallError> {
        self.request(|respond_to| ControllerMessage::GetSnapshot { respond_to })
            .await
    }

    /// Send a message built around a fresh reply channel and await the reply.
    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> ControllerMessage,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))
    }

    /// Observe snapshots as they are published.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Connection work in flight. `attempt == 0` is the initial join.
struct PendingConnect {
    attempt: u32,
    started: Instant,
    step: ConnectStep,
}

enum ConnectStep {
    /// Backoff, then fresh credentials for the current channel.
    Credentials(BoxFuture<'static, Result<ChannelCredentials, CallError>>),
    Join(JoinFuture),
}

enum ConnectProgress {
    Credentials(Result<ChannelCredentials, CallError>),
    Joined(Result<Uid, CallError>),
}

/// The `SessionControllerActor` implementation.
struct SessionControllerActor {
    receiver: mpsc::Receiver<ControllerMessage>,
    events: EventReceiver,
    cancel_token: CancellationToken,
    adapter: MediaEngineAdapter,
    api: Arc<dyn SessionApi>,
    settings: CallSettings,
    session: Option<CallSession>,
    pending_connect: Option<PendingConnect>,
    pending_renewal: Option<BoxFuture<'static, Result<ChannelCredentials, CallError>>>,
    ticker: Option<Interval>,
    navigation: NavigationIntent,
    last_error: Option<CallError>,
    error_visible: bool,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    metrics: Arc<SessionMetrics>,
    mailbox: MailboxMonitor,
}

impl SessionControllerActor {
    /// Run the actor loop.
    #[instrument(skip_all, name = "session.actor.controller")]
    async fn run(mut self) {
        info!(
            target: "session.actor.controller",
            "SessionControllerActor started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "session.actor.controller",
                        "SessionControllerActor received cancellation signal"
                    );
                    self.shutdown();
                    break;
                }

                Some(event) = self.events.recv() => {
                    self.handle_event(event);
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "session.actor.controller",
                                "SessionControllerActor channel closed, exiting"
                            );
                            self.shutdown();
                            break;
                        }
                    }
                }

                progress = next_connect_progress(&mut self.pending_connect) => {
                    self.handle_connect_progress(progress);
                }

                renewal = next_renewal(&mut self.pending_renewal) => {
                    self.handle_renewal(renewal);
                }

                () = next_tick(&mut self.ticker) => {
                    self.handle_tick().await;
                }
            }

            self.publish();
        }

        self.publish();
        info!(
            target: "session.actor.controller",
            messages_processed = self.mailbox.messages_processed(),
            "SessionControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::StartCall {
                call_id,
                role,
                credentials,
                respond_to,
            } => {
                let result = self.start_call(call_id, role, credentials).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::EndCall { notes, respond_to } => {
                let result = self.end_call(notes, "explicit").await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::ToggleLocalAudio { respond_to } => {
                let muted = self.adapter.toggle_local_audio();
                debug!(target: "session.actor.controller", muted, "Local audio toggled");
                let _ = respond_to.send(muted);
            }

            ControllerMessage::ToggleLocalVideo { respond_to } => {
                let muted = self.adapter.toggle_local_video();
                debug!(target: "session.actor.controller", muted, "Local video toggled");
                let _ = respond_to.send(muted);
            }

            ControllerMessage::SwitchCamera { respond_to } => {
                let _ = respond_to.send(self.adapter.switch_camera());
            }

            ControllerMessage::BindLocalSurface {
                surface,
                respond_to,
            } => {
                self.adapter.bind_local_surface(surface);
                let _ = respond_to.send(());
            }

            ControllerMessage::BindRemoteSurface {
                surface,
                uid,
                respond_to,
            } => {
                let _ = respond_to.send(self.adapter.bind_remote_surface(surface, uid));
            }

            ControllerMessage::RetryConnection { respond_to } => {
                let _ = respond_to.send(self.retry_connection());
            }

            ControllerMessage::AcknowledgeError => {
                self.error_visible = false;
            }

            ControllerMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    async fn start_call(
        &mut self,
        call_id: CallId,
        role: Role,
        credentials: Option<ChannelCredentials>,
    ) -> Result<NavigationIntent, CallError> {
        if self.session.as_ref().is_some_and(CallSession::is_active) {
            warn!(
                target: "session.actor.controller",
                call_id = %call_id,
                "Rejected start, a call is already in progress"
            );
            return Err(CallError::Conflict(
                "A call is already in progress".to_string(),
            ));
        }

        let credentials = match credentials {
            Some(credentials) => credentials,
            None => {
                let issue = self
                    .api
                    .issue_token(&call_id, None, self.settings.token_ttl_seconds);
                match until_cancelled(&self.cancel_token, issue).await {
                    Ok(credentials) => credentials,
                    Err(e) => {
                        warn!(
                            target: "session.actor.controller",
                            call_id = %call_id,
                            error = %e,
                            "Could not obtain channel credentials"
                        );
                        self.surface_error(e.clone());
                        return Err(e);
                    }
                }
            }
        };

        let mut session = CallSession::new(
            call_id,
            role,
            credentials,
            self.settings.budget_seconds,
            self.settings.low_time_warning_seconds,
        );
        session.transition_to(CallState::Connecting);

        info!(
            target: "session.actor.controller",
            call_id = %session.call_id(),
            role = role.as_str(),
            "Starting call"
        );

        self.last_error = None;
        self.error_visible = false;
        self.navigation = NavigationIntent::ShowCall;
        self.metrics.call_started(role.as_str());
        prom::set_remote_participants(0);

        if let Err(e) = self.adapter.initialize_engine() {
            session.transition_to(CallState::Disconnected);
            self.session = Some(session);
            self.surface_error(e.clone());
            return Err(e);
        }

        let credentials = session.credentials().clone();
        let join = self.adapter.join_channel(
            &credentials.token,
            &credentials.channel_name,
            credentials.uid,
        );
        self.session = Some(session);
        self.pending_connect = Some(PendingConnect {
            attempt: 0,
            started: Instant::now(),
            step: ConnectStep::Join(join),
        });

        Ok(NavigationIntent::ShowCall)
    }

    fn handle_connect_progress(&mut self, progress: ConnectProgress) {
        let Some(pending) = self.pending_connect.take() else {
            return;
        };

        match progress {
            ConnectProgress::Credentials(Ok(credentials)) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                session.replace_credentials(credentials);
                let credentials = session.credentials().clone();

                self.leave_channel();
                if let Err(e) = self.adapter.initialize_engine() {
                    self.connect_failed(pending.attempt, e);
                    return;
                }
                let join = self.adapter.join_channel(
                    &credentials.token,
                    &credentials.channel_name,
                    credentials.uid,
                );
                self.pending_connect = Some(PendingConnect {
                    attempt: pending.attempt,
                    started: Instant::now(),
                    step: ConnectStep::Join(join),
                });
            }
            ConnectProgress::Credentials(Err(e)) => self.connect_failed(pending.attempt, e),
            ConnectProgress::Joined(result) => {
                self.adapter.on_join_result(&result);
                match result {
                    Ok(uid) => self.connect_succeeded(&pending, uid),
                    Err(e) => self.connect_failed(pending.attempt, e),
                }
            }
        }
    }

    fn connect_succeeded(&mut self, pending: &PendingConnect, uid: Uid) {
        let kind = if pending.attempt == 0 {
            "initial"
        } else {
            "reconnect"
        };
        prom::record_join_duration(kind, pending.started.elapsed());

        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.set_local_uid(uid);
        session.transition_to(CallState::Connected);
        session.finish_reconnecting();

        info!(
            target: "session.actor.controller",
            call_id = %session.call_id(),
            uid = %uid,
            attempt = pending.attempt,
            kind,
            "Joined channel"
        );

        self.resume_countdown();
    }

    fn connect_failed(&mut self, attempt: u32, error: CallError) {
        if attempt == 0 {
            warn!(
                target: "session.actor.controller",
                error = %error,
                "Initial join failed"
            );
            if let Some(session) = self.session.as_mut() {
                session.transition_to(CallState::Disconnected);
            }
            self.surface_error(error);
            return;
        }

        warn!(
            target: "session.actor.controller",
            attempt,
            max_attempts = self.settings.reconnect.max_attempts,
            error = %error,
            "Reconnection attempt failed"
        );
        self.schedule_reconnect_attempt(Some(error));
    }

    /// Begin a fresh reconnection sequence from `Connected` or `Disconnected`.
    fn begin_reconnect(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.transition_to(CallState::Disconnected);
        session.begin_reconnecting();
        self.pending_renewal = None;
        self.schedule_reconnect_attempt(None);
    }

    fn schedule_reconnect_attempt(&mut self, last_error: Option<CallError>) {
        let policy = self.settings.reconnect;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let attempt = session.next_reconnect_attempt();
        if attempt > policy.max_attempts {
            session.finish_reconnecting();
            session.countdown_mut().stop();
            error!(
                target: "session.actor.controller",
                call_id = %session.call_id(),
                max_attempts = policy.max_attempts,
                "Reconnection attempts exhausted, countdown stopped"
            );
            self.ticker = None;
            self.metrics.reconnect_exhausted();
            self.surface_error(last_error.unwrap_or_else(|| {
                CallError::Internal("reconnection is disabled".to_string())
            }));
            return;
        }

        let backoff = policy.backoff_for(attempt);
        let call_id = session.call_id().clone();
        let channel_name = session.credentials().channel_name.clone();
        let ttl_seconds = self.settings.token_ttl_seconds;
        let api = Arc::clone(&self.api);

        info!(
            target: "session.actor.controller",
            call_id = %call_id,
            attempt,
            max_attempts = policy.max_attempts,
            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            "Scheduling reconnection attempt"
        );
        self.metrics.reconnect_attempt();

        let step = async move {
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
            api.issue_token(&call_id, Some(&channel_name), ttl_seconds)
                .await
        }
        .boxed();

        self.pending_connect = Some(PendingConnect {
            attempt,
            started: Instant::now(),
            step: ConnectStep::Credentials(step),
        });
    }

    fn retry_connection(&mut self) -> Result<(), CallError> {
        let in_flight = self.pending_connect.is_some();
        let Some(session) = self.session.as_ref().filter(|s| s.is_active()) else {
            return Err(CallError::NoActiveCall);
        };

        if session.is_awaiting_notes() {
            return Err(CallError::Conflict(
                "The consultation time has ended".to_string(),
            ));
        }
        if in_flight {
            return Err(CallError::Conflict(
                "A connection attempt is already in progress".to_string(),
            ));
        }
        if session.state() != CallState::Disconnected {
            return Err(CallError::Conflict(
                "The call is already connected".to_string(),
            ));
        }

        info!(
            target: "session.actor.controller",
            call_id = %session.call_id(),
            "Manual reconnection requested"
        );
        self.error_visible = false;
        self.begin_reconnect();
        Ok(())
    }

    fn handle_event(&mut self, event: SessionEvent) {
        self.metrics.event_processed(event.kind());

        if !self.session.as_ref().is_some_and(CallSession::is_active) {
            debug!(
                target: "session.actor.controller",
                kind = event.kind(),
                "Event with no active call, ignoring"
            );
            return;
        }

        match event {
            SessionEvent::ParticipantJoined(uid) => {
                if let Some(session) = self.session.as_mut() {
                    if session.add_participant(uid) {
                        info!(
                            target: "session.actor.controller",
                            call_id = %session.call_id(),
                            uid = %uid,
                            "Participant joined"
                        );
                    }
                    prom::set_remote_participants(session.remote_participants().len());
                }
            }

            SessionEvent::ParticipantLeft(uid) => {
                if let Some(session) = self.session.as_mut() {
                    if session.remove_participant(uid) {
                        info!(
                            target: "session.actor.controller",
                            call_id = %session.call_id(),
                            uid = %uid,
                            "Participant left"
                        );
                    }
                    prom::set_remote_participants(session.remote_participants().len());
                }
                self.adapter.release_remote_surface(uid);
            }

            SessionEvent::ConnectionStateChanged { state, reason } => {
                self.handle_connection_state(state, reason);
            }

            SessionEvent::NetworkQuality { uid, tx, rx } => {
                if uid.is_local() {
                    if let Some(session) = self.session.as_mut() {
                        session.record_network_quality(tx, rx);
                    }
                }
            }

            SessionEvent::TokenAboutToExpire => self.renew_token(),

            SessionEvent::RemoteAudioMuted { uid, muted } => {
                if let Some(session) = self.session.as_mut() {
                    session.set_remote_audio_muted(uid, muted);
                }
            }

            SessionEvent::RemoteVideoMuted { uid, muted } => {
                if let Some(session) = self.session.as_mut() {
                    session.set_remote_video_muted(uid, muted);
                }
            }
        }
    }

    fn handle_connection_state(&mut self, state: ConnectionState, reason: ConnectionChangeReason) {
        let in_flight = self.pending_connect.is_some();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        debug!(
            target: "session.actor.controller",
            call_id = %session.call_id(),
            state = ?state,
            reason = ?reason,
            "Connection state changed"
        );

        if session.is_awaiting_notes() {
            return;
        }

        if state.is_lost() {
            if reason == ConnectionChangeReason::LeaveChannel {
                return;
            }
            if in_flight {
                debug!(
                    target: "session.actor.controller",
                    call_id = %session.call_id(),
                    "Connection attempt in flight, ignoring loss"
                );
                return;
            }
            if session.state() == CallState::Connected {
                warn!(
                    target: "session.actor.controller",
                    call_id = %session.call_id(),
                    reason = ?reason,
                    "Connection lost, reconnecting"
                );
                self.begin_reconnect();
            }
        } else if state == ConnectionState::Connected
            && session.state() == CallState::Disconnected
            && !in_flight
        {
            info!(
                target: "session.actor.controller",
                call_id = %session.call_id(),
                "Engine recovered the connection"
            );
            session.transition_to(CallState::Connected);
            session.finish_reconnecting();
            self.resume_countdown();
        }
    }

    fn renew_token(&mut self) {
        if self.pending_connect.is_some() || self.pending_renewal.is_some() {
            debug!(
                target: "session.actor.controller",
                "Token renewal skipped, credential work already in flight"
            );
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.state() != CallState::Connected {
            return;
        }

        let call_id = session.call_id().clone();
        let channel_name = session.credentials().channel_name.clone();
        let ttl_seconds = self.settings.token_ttl_seconds;
        let api = Arc::clone(&self.api);

        debug!(
            target: "session.actor.controller",
            call_id = %call_id,
            "Renewing channel token"
        );

        self.pending_renewal = Some(
            async move {
                api.issue_token(&call_id, Some(&channel_name), ttl_seconds)
                    .await
            }
            .boxed(),
        );
    }

    fn handle_renewal(&mut self, result: Result<ChannelCredentials, CallError>) {
        self.pending_renewal = None;

        let renewed = result.and_then(|credentials| {
            self.adapter
                .renew_token(&credentials.token)
                .map(|()| credentials)
        });

        match renewed {
            Ok(credentials) => {
                if let Some(session) = self.session.as_mut() {
                    // The engine stays joined under its current uid.
                    let uid = session.credentials().uid;
                    session.replace_credentials(ChannelCredentials { uid, ..credentials });
                }
                self.metrics.token_renewed("success");
                info!(target: "session.actor.controller", "Channel token renewed");
            }
            Err(e) => {
                self.metrics.token_renewed("error");
                warn!(
                    target: "session.actor.controller",
                    error = %e,
                    "Channel token renewal failed"
                );
                self.surface_error(e);
            }
        }
    }

    async fn handle_tick(&mut self) {
        let Some(session) = self.session.as_mut() else {
            self.ticker = None;
            return;
        };

        match session.countdown_mut().tick() {
            TickOutcome::Idle => self.ticker = None,
            TickOutcome::Running(_) => {}
            TickOutcome::LowTime(remaining) => {
                info!(
                    target: "session.actor.controller",
                    call_id = %session.call_id(),
                    remaining,
                    "Consultation time running low"
                );
            }
            TickOutcome::Expired => {
                self.ticker = None;
                self.handle_expiry().await;
            }
        }
    }

    async fn handle_expiry(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let role = session.role();
        let action = session.policy().on_expiry(session);

        info!(
            target: "session.actor.controller",
            call_id = %session.call_id(),
            role = role.as_str(),
            action = ?action,
            "Consultation time expired"
        );
        self.metrics.expiry(role.as_str());

        match action {
            ExpiryAction::LeaveAndAwaitNotes => {
                self.pending_connect = None;
                self.pending_renewal = None;
                self.leave_channel();
                if let Some(session) = self.session.as_mut() {
                    session.transition_to(CallState::Disconnected);
                    session.finish_reconnecting();
                    session.set_awaiting_notes(true);
                }
                self.navigation = NavigationIntent::CollectNotes;
            }
            ExpiryAction::EndCall => {
                if let Err(e) = self.end_call(None, "expired").await {
                    warn!(
                        target: "session.actor.controller",
                        error = %e,
                        "Failed to end call on expiry"
                    );
                }
            }
        }
    }

    async fn end_call(
        &mut self,
        notes: Option<String>,
        reason: &'static str,
    ) -> Result<NavigationIntent, CallError> {
        let Some(session) = self.session.as_mut().filter(|s| s.is_active()) else {
            return Err(CallError::NoActiveCall);
        };

        let call_id = session.call_id().clone();
        let role = session.role();
        session.countdown_mut().stop();
        session.capture_notes(notes);
        let notes_to_persist = session
            .policy()
            .notes_to_persist(session.pending_notes())
            .map(str::to_string);

        self.ticker = None;
        self.pending_connect = None;
        self.pending_renewal = None;
        self.leave_channel();

        if let Some(notes) = notes_to_persist {
            let completion = self.api.complete_call(&call_id, &notes);
            match until_cancelled(&self.cancel_token, completion).await {
                Ok(()) => {
                    self.metrics.notes_persisted(true);
                    info!(
                        target: "session.actor.controller",
                        call_id = %call_id,
                        notes_len = notes.len(),
                        "Consultation notes persisted"
                    );
                }
                Err(e) => {
                    self.metrics.notes_persisted(false);
                    warn!(
                        target: "session.actor.controller",
                        call_id = %call_id,
                        notes_len = notes.len(),
                        error = %e,
                        "Consultation notes could not be persisted"
                    );
                    self.surface_error(e);
                }
            }
        }

        self.adapter.destroy();
        if let Some(session) = self.session.as_mut() {
            session.transition_to(CallState::Ended);
            session.finish_reconnecting();
            session.set_awaiting_notes(false);
        }
        self.navigation = NavigationIntent::ReturnHome;
        self.metrics.call_ended(role.as_str(), reason);

        info!(
            target: "session.actor.controller",
            call_id = %call_id,
            role = role.as_str(),
            reason,
            "Call ended"
        );

        Ok(NavigationIntent::ReturnHome)
    }

    /// Tear down without persisting anything.
    fn shutdown(&mut self) {
        self.ticker = None;
        self.pending_connect = None;
        self.pending_renewal = None;

        if let Some(session) = self.session.as_mut().filter(|s| s.is_active()) {
            session.countdown_mut().stop();
            session.finish_reconnecting();
            session.transition_to(CallState::Ended);
            self.metrics
                .call_ended(session.role().as_str(), "shutdown");
            info!(
                target: "session.actor.controller",
                call_id = %session.call_id(),
                "Active call torn down on shutdown"
            );
        }

        self.adapter.destroy();
        self.navigation = NavigationIntent::ReturnHome;
    }

    /// Leave the channel and forget its peers: the engine reports no
    /// offline events for a channel we are no longer in.
    fn leave_channel(&mut self) {
        self.adapter.leave_channel();
        if let Some(session) = self.session.as_mut() {
            for uid in session.clear_participants() {
                self.adapter.release_remote_surface(uid);
            }
        }
        prom::set_remote_participants(0);
    }

    fn resume_countdown(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.countdown_mut().start() && self.ticker.is_none() {
            let mut ticker = tokio::time::interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            self.ticker = Some(ticker);
        }
    }

    fn surface_error(&mut self, error: CallError) {
        self.last_error = Some(error);
        self.error_visible = true;
    }

    fn snapshot(&self) -> SessionSnapshot {
        let mut snapshot = SessionSnapshot {
            remaining_seconds: self.settings.budget_seconds,
            local_audio_muted: self.adapter.local_audio_muted(),
            local_video_muted: self.adapter.local_video_muted(),
            last_error: self.last_error.as_ref().map(CallError::client_message),
            error_visible: self.error_visible,
            navigation: self.navigation,
            ..SessionSnapshot::default()
        };

        if let Some(session) = &self.session {
            snapshot.call_id = Some(session.call_id().clone());
            snapshot.role = Some(session.role());
            snapshot.state = session.state();
            snapshot.remaining_seconds = session.countdown().remaining();
            snapshot.low_time_warning = session.countdown().is_low_time();
            snapshot.remote_participants = session.remote_participants().iter().copied().collect();
            snapshot.remote_media = session.remote_media().clone();
            snapshot.network_quality = session.network_quality();
            snapshot.reconnecting = session.is_reconnecting();
            snapshot.awaiting_notes = session.is_awaiting_notes();
        }

        snapshot
    }

    /// Publish the current snapshot, waking observers only on change.
    fn publish(&self) {
        let next = self.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

/// Await session API work on behalf of a command, giving up as soon as the
/// controller is cancelled.
async fn until_cancelled<T>(
    cancel_token: &CancellationToken,
    work: impl Future<Output = Result<T, CallError>>,
) -> Result<T, CallError> {
    tokio::select! {
        biased;

        () = cancel_token.cancelled() => Err(CallError::Internal(
            "controller cancelled during session API request".to_string(),
        )),
        result = work => result,
    }
}

async fn next_connect_progress(pending: &mut Option<PendingConnect>) -> ConnectProgress {
    match pending {
        Some(PendingConnect {
            step: ConnectStep::Credentials(step),
            ..
        }) => ConnectProgress::Credentials(step.await),
        Some(PendingConnect {
            step: ConnectStep::Join(step),
            ..
        }) => ConnectProgress::Joined(step.await),
        None => std::future::pending().await,
    }
}

async fn next_renewal(
    pending: &mut Option<BoxFuture<'static, Result<ChannelCredentials, CallError>>>,
) -> Result<ChannelCredentials, CallError> {
    match pending {
        Some(renewal) => renewal.await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
