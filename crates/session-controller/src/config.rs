//! Session controller configuration.
//!
//! Configuration is loaded from environment variables. The session API bearer
//! token is redacted in Debug output.

use crate::engine::{EngineConfig, VideoEncoderProfile};
use common::config::{ObservabilityConfig, DEFAULT_LOG_FILTER};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Fixed consultation budget in seconds.
pub const DEFAULT_CALL_BUDGET_SECONDS: u32 = 1800;

/// Remaining time at which the low-time warning is raised.
pub const DEFAULT_LOW_TIME_WARNING_SECONDS: u32 = 300;

/// Lifetime requested for channel tokens.
pub const DEFAULT_TOKEN_TTL_SECONDS: u32 = 3600;

/// Consecutive failed reconnection attempts before the countdown is stopped.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Backoff before the second reconnection attempt.
pub const DEFAULT_RECONNECT_INITIAL_BACKOFF_MS: u64 = 1000;

/// Upper bound on the reconnection backoff.
pub const DEFAULT_RECONNECT_MAX_BACKOFF_MS: u64 = 30_000;

/// Session controller configuration.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the session API (token issuance, call completion).
    pub session_api_url: String,

    /// Bearer token presented to the session API.
    /// Protected by `SecretString` to prevent accidental logging.
    pub session_api_token: SecretString,

    /// Media engine application identifier.
    pub engine_app_id: String,

    /// Consultation budget in seconds (default: 1800).
    pub call_budget_seconds: u32,

    /// Low-time warning threshold in seconds (default: 300).
    pub low_time_warning_seconds: u32,

    /// Requested channel token lifetime in seconds (default: 3600).
    pub token_ttl_seconds: u32,

    /// Maximum consecutive reconnection attempts (default: 5).
    pub reconnect_max_attempts: u32,

    /// Initial reconnection backoff in milliseconds (default: 1000).
    pub reconnect_initial_backoff_ms: u64,

    /// Maximum reconnection backoff in milliseconds (default: 30000).
    pub reconnect_max_backoff_ms: u64,

    /// Running on a device without camera hardware (simulator/emulator).
    pub simulated_device: bool,

    /// Video encoder profile applied at engine initialization.
    pub video_profile: VideoEncoderProfile,

    /// Logging configuration.
    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("session_api_url", &self.session_api_url)
            .field("session_api_token", &"[REDACTED]")
            .field("engine_app_id", &self.engine_app_id)
            .field("call_budget_seconds", &self.call_budget_seconds)
            .field("low_time_warning_seconds", &self.low_time_warning_seconds)
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .field("reconnect_max_attempts", &self.reconnect_max_attempts)
            .field(
                "reconnect_initial_backoff_ms",
                &self.reconnect_initial_backoff_ms,
            )
            .field("reconnect_max_backoff_ms", &self.reconnect_max_backoff_ms)
            .field("simulated_device", &self.simulated_device)
            .field("video_profile", &self.video_profile)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Per-call policy values handed to the controller actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSettings {
    /// Countdown start value in seconds.
    pub budget_seconds: u32,
    /// Remaining time at which `low_time_warning` is raised.
    pub low_time_warning_seconds: u32,
    /// Requested channel token lifetime.
    pub token_ttl_seconds: u32,
    /// Reconnection retry policy.
    pub reconnect: ReconnectPolicy,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            budget_seconds: DEFAULT_CALL_BUDGET_SECONDS,
            low_time_warning_seconds: DEFAULT_LOW_TIME_WARNING_SECONDS,
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Exponential backoff for reconnection attempts.
///
/// The first attempt runs immediately; attempt `n >= 2` waits
/// `initial_backoff * 2^(n-2)`, capped at `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_RECONNECT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_RECONNECT_MAX_BACKOFF_MS),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given (1-based) attempt.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let session_api_url = required(vars, "SESSION_API_URL")?;
        let session_api_token = SecretString::from(required(vars, "SESSION_API_TOKEN")?);
        let engine_app_id = required(vars, "ENGINE_APP_ID")?;

        let call_budget_seconds =
            parse_or(vars, "CALL_BUDGET_SECONDS", DEFAULT_CALL_BUDGET_SECONDS)?;
        if call_budget_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "CALL_BUDGET_SECONDS must be greater than zero".to_string(),
            ));
        }

        let low_time_warning_seconds = parse_or(
            vars,
            "CALL_LOW_TIME_WARNING_SECONDS",
            DEFAULT_LOW_TIME_WARNING_SECONDS,
        )?;
        let token_ttl_seconds = parse_or(vars, "CALL_TOKEN_TTL_SECONDS", DEFAULT_TOKEN_TTL_SECONDS)?;
        let reconnect_max_attempts = parse_or(
            vars,
            "CALL_RECONNECT_MAX_ATTEMPTS",
            DEFAULT_RECONNECT_MAX_ATTEMPTS,
        )?;
        let reconnect_initial_backoff_ms = parse_or(
            vars,
            "CALL_RECONNECT_INITIAL_BACKOFF_MS",
            DEFAULT_RECONNECT_INITIAL_BACKOFF_MS,
        )?;
        let reconnect_max_backoff_ms = parse_or(
            vars,
            "CALL_RECONNECT_MAX_BACKOFF_MS",
            DEFAULT_RECONNECT_MAX_BACKOFF_MS,
        )?;
        let simulated_device = parse_or(vars, "CALL_SIMULATED_DEVICE", false)?;

        let defaults = VideoEncoderProfile::default();
        let video_profile = VideoEncoderProfile {
            width: parse_or(vars, "CALL_VIDEO_WIDTH", defaults.width)?,
            height: parse_or(vars, "CALL_VIDEO_HEIGHT", defaults.height)?,
            frame_rate: parse_or(vars, "CALL_VIDEO_FRAME_RATE", defaults.frame_rate)?,
            bitrate_kbps: parse_or(vars, "CALL_VIDEO_BITRATE_KBPS", defaults.bitrate_kbps)?,
        };

        let observability = ObservabilityConfig {
            log_level: vars
                .get("LOG_LEVEL")
                .cloned()
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            json_logs: parse_or(vars, "LOG_JSON", false)?,
        };

        Ok(Config {
            session_api_url,
            session_api_token,
            engine_app_id,
            call_budget_seconds,
            low_time_warning_seconds,
            token_ttl_seconds,
            reconnect_max_attempts,
            reconnect_initial_backoff_ms,
            reconnect_max_backoff_ms,
            simulated_device,
            video_profile,
            observability,
        })
    }

    /// Per-call policy values for the controller actor.
    #[must_use]
    pub fn call_settings(&self) -> CallSettings {
        CallSettings {
            budget_seconds: self.call_budget_seconds,
            low_time_warning_seconds: self.low_time_warning_seconds,
            token_ttl_seconds: self.token_ttl_seconds,
            reconnect: ReconnectPolicy {
                max_attempts: self.reconnect_max_attempts,
                initial_backoff: Duration::from_millis(self.reconnect_initial_backoff_ms),
                max_backoff: Duration::from_millis(self.reconnect_max_backoff_ms),
            },
        }
    }

    /// Engine initialization parameters for the media engine adapter.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            app_id: self.engine_app_id.clone(),
            video_profile: self.video_profile,
            simulated_device: self.simulated_device,
        }
    }
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    vars.get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "SESSION_API_URL".to_string(),
                "https://api.example.test".to_string(),
            ),
            (
                "SESSION_API_TOKEN".to_string(),
                "svc-token-abcdef123456".to_string(),
            ),
            ("ENGINE_APP_ID".to_string(), "app-1234".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = base_vars();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.session_api_url, "https://api.example.test");
        assert_eq!(
            config.session_api_token.expose_secret(),
            "svc-token-abcdef123456"
        );
        assert_eq!(config.engine_app_id, "app-1234");
        assert_eq!(config.call_budget_seconds, DEFAULT_CALL_BUDGET_SECONDS);
        assert_eq!(
            config.low_time_warning_seconds,
            DEFAULT_LOW_TIME_WARNING_SECONDS
        );
        assert_eq!(config.token_ttl_seconds, DEFAULT_TOKEN_TTL_SECONDS);
        assert_eq!(config.reconnect_max_attempts, DEFAULT_RECONNECT_MAX_ATTEMPTS);
        assert!(!config.simulated_device);
        assert_eq!(config.video_profile, VideoEncoderProfile::default());
        assert_eq!(config.observability, ObservabilityConfig::default());
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("CALL_BUDGET_SECONDS".to_string(), "900".to_string());
        vars.insert("CALL_LOW_TIME_WARNING_SECONDS".to_string(), "60".to_string());
        vars.insert("CALL_RECONNECT_MAX_ATTEMPTS".to_string(), "3".to_string());
        vars.insert("CALL_SIMULATED_DEVICE".to_string(), "true".to_string());
        vars.insert("CALL_VIDEO_WIDTH".to_string(), "1280".to_string());
        vars.insert("LOG_LEVEL".to_string(), "info".to_string());
        vars.insert("LOG_JSON".to_string(), "true".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.call_budget_seconds, 900);
        assert_eq!(config.low_time_warning_seconds, 60);
        assert_eq!(config.reconnect_max_attempts, 3);
        assert!(config.simulated_device);
        assert_eq!(config.video_profile.width, 1280);
        assert_eq!(config.observability.log_level, "info");
        assert!(config.observability.json_logs);

        let settings = config.call_settings();
        assert_eq!(settings.budget_seconds, 900);
        assert_eq!(settings.reconnect.max_attempts, 3);

        let engine = config.engine_config();
        assert!(engine.simulated_device);
        assert_eq!(engine.app_id, "app-1234");
    }

    #[test]
    fn test_from_vars_missing_session_api_url() {
        let mut vars = base_vars();
        vars.remove("SESSION_API_URL");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "SESSION_API_URL"));
    }

    #[test]
    fn test_from_vars_rejects_unparseable_value() {
        let mut vars = base_vars();
        vars.insert("CALL_BUDGET_SECONDS".to_string(), "half-hour".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_from_vars_rejects_zero_budget() {
        let mut vars = base_vars();
        vars.insert("CALL_BUDGET_SECONDS".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("svc-token-abcdef123456"));
    }

    #[test]
    fn test_reconnect_backoff_schedule() {
        let policy = ReconnectPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        };

        assert_eq!(policy.backoff_for(1), Duration::ZERO);
        assert_eq!(policy.backoff_for(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(5));
    }
}
