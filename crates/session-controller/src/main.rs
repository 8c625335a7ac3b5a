//! Session Controller simulator
//!
//! Runs one consultation against a real session API with the in-memory media
//! engine standing in for the native SDK. Useful for exercising token
//! issuance, the countdown and end-of-call handling without a device.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Spawn the controller actor
//! 4. Start the call for `SIM_CALL_ID` as `SIM_ROLE`
//! 5. Follow snapshots until the call ends or Ctrl+C

#![warn(clippy::pedantic)]

use std::env;

use common::types::CallId;
use session_controller::config::Config;
use session_controller::engine::mock::MockMediaEngine;
use session_controller::observability::init_tracing;
use session_controller::{
    CallState, NavigationIntent, Role, SessionControllerHandle, SessionMetrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_tracing(&config.observability)?;

    let call_id =
        CallId::new(env::var("SIM_CALL_ID").unwrap_or_else(|_| "sim-booking".to_string()));
    let role = match env::var("SIM_ROLE").as_deref() {
        Ok("clinician") => Role::Clinician,
        _ => Role::Patient,
    };
    let notes = env::var("SIM_NOTES").ok();

    info!(
        call_id = %call_id,
        role = role.as_str(),
        budget_seconds = config.call_budget_seconds,
        "Starting simulated call"
    );

    let cancel_token = CancellationToken::new();
    let metrics = SessionMetrics::new();
    let (handle, task) = SessionControllerHandle::spawn_with_config(
        &config,
        MockMediaEngine::new(),
        metrics.clone(),
        cancel_token.clone(),
    )?;

    handle.start_call_for_booking(call_id, role).await?;

    let mut snapshots = handle.subscribe();
    let mut last_state = CallState::Idle;
    loop {
        tokio::select! {
            () = shutdown_signal() => {
                info!("Shutdown signal received, ending call");
                if let Err(e) = handle.end_call(notes.clone()).await {
                    warn!(error = %e, "Call was not active at shutdown");
                }
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.state != last_state {
                    info!(
                        state = snapshot.state.as_str(),
                        remaining_seconds = snapshot.remaining_seconds,
                        "Call state changed"
                    );
                    last_state = snapshot.state;
                }
                if snapshot.navigation == NavigationIntent::CollectNotes {
                    handle.end_call(notes.clone()).await?;
                }
                if snapshot.state == CallState::Ended {
                    break;
                }
            }
        }
    }

    cancel_token.cancel();
    task.await?;

    let totals = metrics.snapshot();
    info!(
        expiries = totals.expiries,
        reconnect_attempts = totals.reconnect_attempts,
        notes_persisted = totals.notes_persisted,
        "Simulated call finished"
    );
    Ok(())
}

/// Wait for Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
