//! End-to-end tests for the session controller actor.
//!
//! Every test runs on paused tokio time. The countdown ticker and the
//! reconnection backoff are tokio timers, so a test either advances the
//! clock explicitly or lets the runtime auto-advance while it waits for a
//! snapshot.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use common::types::{SurfaceHandle, Uid};
use session_controller::engine::mock::{EngineCommand, MockMediaEngine};
use session_controller::config::CallSettings;
use session_controller::engine::{EngineCallback, EngineConfig};
use session_controller::events::NetworkQuality;
use session_controller::services::session_api::mock::MockSessionApi;
use session_controller::{CallError, CallState, NavigationIntent};
use session_test_utils::*;

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_patient_call_ends_when_time_expires() {
    let harness = SessionHarness::builder().build();
    let call = TestCall::patient();

    harness.start(&call).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    let ended = harness.wait_for(|s| s.state == CallState::Ended).await;
    assert_eq!(ended.remaining_seconds, 0);
    assert!(ended.low_time_warning);
    assert_eq!(ended.navigation, NavigationIntent::ReturnHome);
    assert!(harness.api.completions().is_empty());
    assert_eq!(
        harness.engine.count(|c| matches!(c, EngineCommand::Release)),
        1
    );

    // Expiry fires once, however long the clock keeps running.
    tokio::time::advance(Duration::from_secs(120)).await;
    let snapshot = harness.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, CallState::Ended);

    let metrics = harness.metrics.snapshot();
    assert_eq!(metrics.expiries, 1);
    assert_eq!(metrics.calls_ended, 1);
}

#[tokio::test(start_paused = true)]
async fn test_clinician_expiry_waits_for_notes() {
    let harness = SessionHarness::builder().build();
    let call = TestCall::clinician();

    harness.start(&call).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;
    harness.remote_joins(TEST_REMOTE_UID);

    let expired = harness.wait_for(|s| s.awaiting_notes).await;
    assert_eq!(expired.state, CallState::Disconnected);
    assert_eq!(expired.remaining_seconds, 0);
    assert!(expired.remote_participants.is_empty());
    assert_eq!(expired.navigation, NavigationIntent::CollectNotes);
    assert_eq!(harness.leave_count(), 1);

    // Nothing ends the call until the clinician submits.
    tokio::time::advance(Duration::from_secs(60)).await;
    let waiting = harness.handle.snapshot().await.unwrap();
    assert_eq!(waiting.state, CallState::Disconnected);
    assert!(waiting.awaiting_notes);
    assert!(harness.api.completions().is_empty());

    let intent = harness
        .handle
        .end_call(Some("follow up in 2 weeks".to_string()))
        .await
        .unwrap();
    assert_eq!(intent, NavigationIntent::ReturnHome);
    assert_eq!(
        harness.api.completions(),
        vec![(call.call_id.clone(), "follow up in 2 weeks".to_string())]
    );

    let ended = harness.handle.snapshot().await.unwrap();
    assert_eq!(ended.state, CallState::Ended);
    assert!(!ended.awaiting_notes);
    assert_eq!(harness.metrics.snapshot().expiries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_clinician_expiry_during_reconnect_awaits_notes() {
    let harness = SessionHarness::builder()
        .settings(CallSettings {
            budget_seconds: 10,
            ..test_settings()
        })
        .build();
    let call = TestCall::clinician();

    harness.start(&call).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    // The rejoin outlasts the remaining budget.
    harness.engine.set_join_delay(Duration::from_secs(60));
    harness.drop_connection();
    harness.wait_for(|s| s.reconnecting).await;

    let expired = harness.wait_for(|s| s.awaiting_notes).await;
    assert_eq!(expired.state, CallState::Disconnected);
    assert!(!expired.reconnecting);
    assert_eq!(expired.remaining_seconds, 0);
    assert_eq!(expired.navigation, NavigationIntent::CollectNotes);

    // The abandoned rejoin never completes and nothing retries.
    tokio::time::advance(Duration::from_secs(120)).await;
    let waiting = harness.handle.snapshot().await.unwrap();
    assert_eq!(waiting.state, CallState::Disconnected);
    assert!(waiting.awaiting_notes);
    assert_eq!(harness.join_count(), 2);
    assert_eq!(harness.metrics.snapshot().reconnect_attempts, 1);

    harness
        .handle
        .end_call(Some("connection dropped near the end".to_string()))
        .await
        .unwrap();
    assert_eq!(
        harness.api.completions(),
        vec![(
            call.call_id.clone(),
            "connection dropped near the end".to_string()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn test_clinician_can_retry_only_before_expiry() {
    let harness = SessionHarness::builder().build();
    let call = TestCall::clinician();

    harness.start(&call).await.unwrap();
    harness.wait_for(|s| s.awaiting_notes).await;

    let result = harness.handle.retry_connection().await;
    assert!(matches!(result, Err(CallError::Conflict(_))));
    assert_eq!(harness.join_count(), 1);
}

// ============================================================================
// Ending early
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_clinician_end_call_persists_notes() {
    let harness = SessionHarness::builder().build();
    let call = TestCall::clinician();

    harness.start(&call).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;
    tokio::time::advance(Duration::from_secs(30)).await;

    harness
        .handle
        .end_call(Some("prescribed rest".to_string()))
        .await
        .unwrap();

    assert_eq!(
        harness.api.completions(),
        vec![(call.call_id.clone(), "prescribed rest".to_string())]
    );
    let metrics = harness.metrics.snapshot();
    assert_eq!(metrics.notes_persisted, 1);
    assert_eq!(metrics.expiries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_clinician_empty_notes_are_not_persisted() {
    let harness = SessionHarness::builder().build();
    let call = TestCall::clinician();

    harness.start(&call).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    harness.handle.end_call(Some(String::new())).await.unwrap();
    assert!(harness.api.completions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_patient_notes_are_never_persisted() {
    let harness = SessionHarness::builder().build();
    let call = TestCall::patient();

    harness.start(&call).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    harness
        .handle
        .end_call(Some("should be ignored".to_string()))
        .await
        .unwrap();

    assert!(harness.api.completions().is_empty());
    assert_eq!(
        harness.handle.snapshot().await.unwrap().state,
        CallState::Ended
    );
}

#[tokio::test(start_paused = true)]
async fn test_notes_persistence_failure_still_ends_call() {
    let harness = SessionHarness::builder()
        .api(MockSessionApi::failing_completion())
        .build();
    let call = TestCall::clinician();

    harness.start(&call).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    let intent = harness
        .handle
        .end_call(Some("notes".to_string()))
        .await
        .unwrap();
    assert_eq!(intent, NavigationIntent::ReturnHome);

    let snapshot = harness.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, CallState::Ended);
    assert!(snapshot.error_visible);
    assert_eq!(
        snapshot.last_error.as_deref(),
        Some("The call ended but your notes could not be saved")
    );
    assert_eq!(harness.metrics.snapshot().notes_persist_failures, 1);
    assert_eq!(
        harness.engine.count(|c| matches!(c, EngineCommand::Release)),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_end_call_cancels_in_flight_reconnect() {
    let harness = SessionHarness::builder().build();

    harness.start(&TestCall::patient()).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    harness.engine.set_join_delay(Duration::from_secs(10));
    harness.drop_connection();
    harness.wait_for(|s| s.reconnecting).await;

    harness.handle.end_call(None).await.unwrap();
    let ended = harness.handle.snapshot().await.unwrap();
    assert_eq!(ended.state, CallState::Ended);
    assert!(!ended.reconnecting);
    assert_eq!(ended.navigation, NavigationIntent::ReturnHome);

    tokio::time::advance(Duration::from_secs(30)).await;
    let later = harness.handle.snapshot().await.unwrap();
    assert_eq!(later.state, CallState::Ended);
    assert_eq!(harness.join_count(), 2);
    assert_eq!(
        harness.engine.count(|c| matches!(c, EngineCommand::Release)),
        1
    );
    assert_eq!(harness.metrics.snapshot().reconnect_attempts, 1);
    assert!(!harness.task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_booking_credentials() {
    let harness = SessionHarness::builder().build();
    harness.api.set_issue_delay(Duration::from_secs(30));
    let call = TestCall::patient();

    let handle = harness.handle.clone();
    let call_id = call.call_id.clone();
    let start =
        tokio::spawn(async move { handle.start_call_for_booking(call_id, call.role).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    let cancelled_at = tokio::time::Instant::now();
    harness.handle.cancel();

    let result = start.await.unwrap();
    assert!(matches!(result, Err(CallError::Internal(_))));
    harness.task.await.unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_secs(30));
    assert_eq!(harness.api.issue_count(), 1);
    assert!(harness.engine.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_end_call_twice_reports_no_active_call() {
    let harness = SessionHarness::builder().build();
    let call = TestCall::patient();

    harness.start(&call).await.unwrap();
    harness.handle.end_call(None).await.unwrap();

    let result = harness.handle.end_call(None).await;
    assert_eq!(result, Err(CallError::NoActiveCall));
}

#[tokio::test(start_paused = true)]
async fn test_new_call_after_previous_ended() {
    let harness = SessionHarness::builder().build();

    harness.start(&TestCall::patient()).await.unwrap();
    harness.handle.end_call(None).await.unwrap();

    let next = TestCall::patient();
    harness.start(&next).await.unwrap();
    let snapshot = harness.wait_for(|s| s.state == CallState::Connected).await;
    assert_eq!(snapshot.call_id, Some(next.call_id));
    assert_eq!(snapshot.remaining_seconds, 1800);
    assert_eq!(harness.metrics.snapshot().calls_started, 2);
}

// ============================================================================
// Participants and engine events
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_duplicate_join_events_keep_one_participant() {
    let harness = SessionHarness::builder().build();

    harness.start(&TestCall::patient()).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    harness.remote_joins(TEST_REMOTE_UID);
    harness.remote_joins(TEST_REMOTE_UID);

    let snapshot = harness.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.remote_participants, vec![TEST_REMOTE_UID]);

    harness.emit(EngineCallback::UserOffline {
        uid: Uid(7),
        reason: 0,
    });
    harness.emit(EngineCallback::UserOffline {
        uid: TEST_REMOTE_UID,
        reason: 0,
    });

    let snapshot = harness.handle.snapshot().await.unwrap();
    assert!(snapshot.remote_participants.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_remote_mute_and_network_quality_are_tracked() {
    let harness = SessionHarness::builder().build();

    harness.start(&TestCall::patient()).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    harness.remote_joins(TEST_REMOTE_UID);
    harness.emit(EngineCallback::UserMuteVideo {
        uid: TEST_REMOTE_UID,
        muted: true,
    });
    harness.emit(EngineCallback::NetworkQuality {
        uid: Uid::LOCAL,
        tx_quality: 1,
        rx_quality: 3,
    });
    // Remote link readings do not change the local indicator.
    harness.emit(EngineCallback::NetworkQuality {
        uid: TEST_REMOTE_UID,
        tx_quality: 6,
        rx_quality: 6,
    });

    let snapshot = harness.handle.snapshot().await.unwrap();
    let media = snapshot.remote_media.get(&TEST_REMOTE_UID).unwrap();
    assert!(media.video_muted);
    assert!(!media.audio_muted);
    assert_eq!(snapshot.network_quality, NetworkQuality::Poor);
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_forgets_peers_from_previous_join() {
    let harness = SessionHarness::builder().build();

    harness.start(&TestCall::patient()).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    harness.remote_joins(TEST_REMOTE_UID);
    harness.emit(EngineCallback::UserMuteVideo {
        uid: TEST_REMOTE_UID,
        muted: true,
    });
    let joined = harness.handle.snapshot().await.unwrap();
    assert_eq!(joined.remote_participants, vec![TEST_REMOTE_UID]);

    // The peer may leave while we are out of the channel; no offline event
    // arrives for it.
    harness.engine.set_join_delay(Duration::from_secs(1));
    harness.drop_connection();
    let rejoining = harness
        .wait_for(|s| s.reconnecting && s.remote_participants.is_empty())
        .await;
    assert!(rejoining.remote_media.is_empty());
    assert_eq!(harness.leave_count(), 1);

    let recovered = harness.wait_for(|s| s.state == CallState::Connected).await;
    assert!(recovered.remote_participants.is_empty());
    assert!(recovered.remote_media.is_empty());
    assert_eq!(harness.join_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_preserves_elapsed_countdown() {
    let harness = SessionHarness::builder().build();
    let call = TestCall::patient();

    harness.start(&call).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    tokio::time::advance(Duration::from_secs(10)).await;
    let before = harness.wait_for(|s| s.remaining_seconds == 1790).await;

    harness.engine.set_join_delay(Duration::from_millis(4500));
    harness.drop_connection();

    let reconnecting = harness.wait_for(|s| s.reconnecting).await;
    assert_eq!(reconnecting.state, CallState::Disconnected);

    let recovered = harness.wait_for(|s| s.state == CallState::Connected).await;
    // The countdown kept running for the 4.5s the rejoin took.
    assert_eq!(recovered.remaining_seconds, before.remaining_seconds - 4);
    assert!(!recovered.reconnecting);
    assert_eq!(harness.join_count(), 2);
    assert_eq!(
        harness.api.issue_requests(),
        vec![(call.call_id.clone(), Some(call.channel_name.clone()))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_loss_during_reconnect_does_not_start_another() {
    let harness = SessionHarness::builder().build();

    harness.start(&TestCall::patient()).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    harness.engine.set_join_delay(Duration::from_secs(5));
    harness.drop_connection();
    harness.wait_for(|s| s.reconnecting).await;

    harness.drop_connection();
    harness.emit(EngineCallback::ConnectionStateChanged {
        state: 5,
        reason: ENGINE_REASON_INTERRUPTED,
    });

    harness.wait_for(|s| s.state == CallState::Connected).await;
    assert_eq!(harness.join_count(), 2);
    assert_eq!(harness.metrics.snapshot().reconnect_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_reconnect_freezes_countdown_until_retry() {
    let engine = MockMediaEngine::with_join_results(vec![
        Ok(TEST_LOCAL_UID),
        Err(110),
        Err(110),
        Err(110),
    ]);
    let harness = SessionHarness::builder().engine(engine).build();

    harness.start(&TestCall::patient()).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;
    tokio::time::advance(Duration::from_secs(5)).await;
    harness.wait_for(|s| s.remaining_seconds == 1795).await;

    // Attempts at +0s, +0.5s and +1.5s all fail; one tick lands in between.
    harness.drop_connection();
    let exhausted = harness
        .wait_for(|s| s.error_visible && !s.reconnecting)
        .await;
    assert_eq!(exhausted.state, CallState::Disconnected);
    assert_eq!(exhausted.remaining_seconds, 1794);
    assert!(exhausted.last_error.is_some());

    let metrics = harness.metrics.snapshot();
    assert_eq!(metrics.reconnect_attempts, 3);
    assert_eq!(metrics.reconnects_exhausted, 1);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(
        harness.handle.snapshot().await.unwrap().remaining_seconds,
        1794
    );

    harness.handle.retry_connection().await.unwrap();
    let recovered = harness.wait_for(|s| s.state == CallState::Connected).await;
    assert!(!recovered.error_visible);
    assert_eq!(recovered.remaining_seconds, 1794);

    harness.wait_for(|s| s.remaining_seconds == 1791).await;
}

#[tokio::test(start_paused = true)]
async fn test_engine_recovery_without_rejoin() {
    let engine = MockMediaEngine::with_join_results(vec![Ok(TEST_LOCAL_UID), Err(110)]);
    let settings = session_controller::config::CallSettings {
        reconnect: session_controller::config::ReconnectPolicy {
            max_attempts: 1,
            ..test_settings().reconnect
        },
        ..test_settings()
    };
    let harness = SessionHarness::builder()
        .engine(engine)
        .settings(settings)
        .build();

    harness.start(&TestCall::patient()).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    harness.drop_connection();
    harness.wait_for(|s| s.error_visible).await;

    harness.emit(EngineCallback::ConnectionStateChanged {
        state: ENGINE_STATE_CONNECTED,
        reason: 1,
    });
    let recovered = harness.wait_for(|s| s.state == CallState::Connected).await;
    assert!(!recovered.reconnecting);
}

// ============================================================================
// Token renewal
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_token_renewed_before_expiry() {
    let harness = SessionHarness::builder().build();
    let call = TestCall::clinician();

    harness.start(&call).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    harness.emit(EngineCallback::TokenPrivilegeWillExpire);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
        harness
            .engine
            .count(|c| *c == EngineCommand::RenewToken("token-1".to_string())),
        1
    );
    assert_eq!(
        harness.api.issue_requests(),
        vec![(call.call_id.clone(), Some(call.channel_name.clone()))]
    );
    assert_eq!(harness.metrics.snapshot().token_renewals, 1);
    assert_eq!(
        harness.handle.snapshot().await.unwrap().state,
        CallState::Connected
    );
}

#[tokio::test(start_paused = true)]
async fn test_token_renewal_failure_surfaces_error() {
    let harness = SessionHarness::builder()
        .api(MockSessionApi::failing_issue())
        .build();

    harness.start(&TestCall::clinician()).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    harness.emit(EngineCallback::TokenPrivilegeWillExpire);
    let snapshot = harness.wait_for(|s| s.error_visible).await;
    assert_eq!(snapshot.state, CallState::Connected);
    assert_eq!(
        harness
            .engine
            .count(|c| matches!(c, EngineCommand::RenewToken(_))),
        0
    );

    harness.handle.acknowledge_error().await.unwrap();
    harness.wait_for(|s| !s.error_visible).await;
}

// ============================================================================
// Local media and surfaces
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_local_mute_toggles() {
    let harness = SessionHarness::builder().build();

    harness.start(&TestCall::patient()).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    assert!(harness.handle.toggle_local_video().await.unwrap());
    assert!(!harness.handle.toggle_local_video().await.unwrap());
    assert!(harness.handle.toggle_local_audio().await.unwrap());

    let video: Vec<EngineCommand> = harness
        .engine
        .commands()
        .into_iter()
        .filter(|c| matches!(c, EngineCommand::EnableLocalVideo(_)))
        .collect();
    assert_eq!(
        video,
        vec![
            EngineCommand::EnableLocalVideo(false),
            EngineCommand::EnableLocalVideo(true),
        ]
    );
    assert_eq!(
        harness
            .engine
            .count(|c| *c == EngineCommand::MuteLocalAudio(true)),
        1
    );

    let snapshot = harness.handle.snapshot().await.unwrap();
    assert!(snapshot.local_audio_muted);
    assert!(!snapshot.local_video_muted);
}

#[tokio::test(start_paused = true)]
async fn test_local_surface_bound_before_start_is_applied() {
    let harness = SessionHarness::builder().build();

    harness
        .handle
        .bind_local_surface(SurfaceHandle(7))
        .await
        .unwrap();
    assert!(harness.engine.commands().is_empty());

    harness.start(&TestCall::patient()).await.unwrap();
    assert_eq!(
        harness
            .engine
            .count(|c| *c == EngineCommand::SetupLocalVideo(SurfaceHandle(7))),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_simulated_device_never_publishes_camera() {
    let harness = SessionHarness::builder()
        .engine_config(EngineConfig {
            simulated_device: true,
            ..test_engine_config()
        })
        .build();

    harness.start(&TestCall::patient()).await.unwrap();
    harness.wait_for(|s| s.state == CallState::Connected).await;

    let published: Vec<bool> = harness
        .engine
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            EngineCommand::JoinChannel { options, .. } => Some(options.publish_camera_track),
            _ => None,
        })
        .collect();
    assert_eq!(published, vec![false]);
}

#[tokio::test(start_paused = true)]
async fn test_remote_surface_requires_engine() {
    let harness = SessionHarness::builder().build();

    let result = harness
        .handle
        .bind_remote_surface(SurfaceHandle(9), TEST_REMOTE_UID)
        .await;
    assert_eq!(result, Err(CallError::EngineNotInitialized));

    harness.start(&TestCall::patient()).await.unwrap();
    harness
        .handle
        .bind_remote_surface(SurfaceHandle(9), TEST_REMOTE_UID)
        .await
        .unwrap();
    assert_eq!(
        harness
            .engine
            .count(|c| *c == EngineCommand::SetupRemoteVideo(SurfaceHandle(9), TEST_REMOTE_UID)),
        1
    );
}

// ============================================================================
// Startup failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_engine_initialize_failure_is_reported() {
    let engine = MockMediaEngine::new();
    engine.fail_initialize(-7);
    let harness = SessionHarness::builder().engine(engine).build();

    let result = harness.start(&TestCall::patient()).await;
    assert!(matches!(result, Err(CallError::Internal(_))));

    let snapshot = harness.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, CallState::Disconnected);
    assert!(snapshot.error_visible);
    assert_eq!(harness.join_count(), 0);
}
