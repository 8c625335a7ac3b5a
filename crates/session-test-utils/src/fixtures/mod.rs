//! Pre-configured test data fixtures for session controller testing.

use common::secret::SecretString;
use common::types::{CallId, Uid};
use session_controller::actors::ChannelCredentials;
use session_controller::config::{CallSettings, ReconnectPolicy};
use session_controller::engine::EngineConfig;
use session_controller::Role;
use std::time::Duration;
use uuid::Uuid;

/// Uid the fixture credentials join under.
pub const TEST_LOCAL_UID: Uid = Uid(1001);

/// Uid used for the far-side participant.
pub const TEST_REMOTE_UID: Uid = Uid(42);

/// Test call fixture.
#[derive(Debug, Clone)]
pub struct TestCall {
    /// Booking identifier.
    pub call_id: CallId,
    /// Local participant role.
    pub role: Role,
    /// Channel the credentials are for.
    pub channel_name: String,
    /// Token presented at join.
    pub token: String,
}

impl TestCall {
    /// Create a test call with the given booking id.
    #[must_use]
    pub fn new(call_id: impl Into<String>, role: Role) -> Self {
        let call_id = call_id.into();
        Self {
            channel_name: format!("channel-{call_id}"),
            call_id: CallId::new(call_id),
            role,
            token: "token-fixture".to_string(),
        }
    }

    /// Create a test call with a random booking id.
    #[must_use]
    pub fn random(role: Role) -> Self {
        Self::new(format!("booking-{}", Uuid::new_v4()), role)
    }

    #[must_use]
    pub fn clinician() -> Self {
        Self::random(Role::Clinician)
    }

    #[must_use]
    pub fn patient() -> Self {
        Self::random(Role::Patient)
    }

    /// Set the channel name.
    #[must_use]
    pub fn with_channel(mut self, channel_name: impl Into<String>) -> Self {
        self.channel_name = channel_name.into();
        self
    }

    /// Credentials for this call, joining as [`TEST_LOCAL_UID`].
    #[must_use]
    pub fn credentials(&self) -> ChannelCredentials {
        ChannelCredentials {
            token: SecretString::from(self.token.clone()),
            channel_name: self.channel_name.clone(),
            uid: TEST_LOCAL_UID,
        }
    }
}

/// Call settings with production budgets and a short, deterministic backoff.
#[must_use]
pub fn test_settings() -> CallSettings {
    CallSettings {
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(2),
        },
        ..CallSettings::default()
    }
}

/// Engine configuration for a device with a camera.
#[must_use]
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        app_id: "test-app".to_string(),
        ..EngineConfig::default()
    }
}
