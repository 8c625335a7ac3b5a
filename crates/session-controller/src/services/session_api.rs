//! Session API client.
//!
//! The session API is the backend collaborator that owns bookings. The
//! controller consumes two of its operations:
//!
//! - Token issuance: given a call identifier (and optionally the channel
//!   already in use), returns channel credentials for the media engine.
//!   Used at `start_call` and on every reconnection attempt.
//! - Call completion: records that a call ended, with the clinician's notes.
//!
//! # Security
//!
//! - The controller authenticates with a bearer token held as a `SecretString`
//! - Channel tokens are never logged
//! - Timeouts prevent a slow backend from stalling reconnection

use crate::errors::CallError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{CallId, Uid};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, instrument, warn};

/// Default timeout for session API requests in seconds.
const SESSION_API_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Connect timeout for session API requests in seconds.
const SESSION_API_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Credentials authorizing one uid to join one channel.
#[derive(Debug, Clone)]
pub struct ChannelCredentials {
    pub token: SecretString,
    pub channel_name: String,
    pub uid: Uid,
}

/// Backend operations the controller depends on.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Issue channel credentials for `call_id`.
    ///
    /// `channel_name` pins the channel when reconnecting; `None` lets the
    /// backend pick the channel bound to the booking.
    async fn issue_token(
        &self,
        call_id: &CallId,
        channel_name: Option<&str>,
        ttl_seconds: u32,
    ) -> Result<ChannelCredentials, CallError>;

    /// Record that `call_id` ended with the given notes.
    async fn complete_call(&self, call_id: &CallId, notes: &str) -> Result<(), CallError>;
}

/// Request body for token issuance.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<&'a str>,

    /// Token lifetime in seconds.
    pub ttl_seconds: u32,
}

/// Response body for token issuance.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub channel_name: String,
    pub uid: u32,
}

/// Request body for call completion.
#[derive(Debug, Clone, Serialize)]
pub struct CompleteCallRequest<'a> {
    pub notes: &'a str,
}

/// Error body returned by the session API on 4xx responses.
#[derive(Debug, Clone, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// HTTP implementation of [`SessionApi`].
#[derive(Clone)]
pub struct HttpSessionApi {
    client: Client,
    base_url: String,
    service_token: SecretString,
}

impl HttpSessionApi {
    /// Create a new session API client.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Internal` if the HTTP client cannot be built.
    pub fn new(base_url: String, service_token: SecretString) -> Result<Self, CallError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(SESSION_API_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(SESSION_API_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "session.services.session_api", error = %e, "Failed to build HTTP client");
                CallError::Internal("failed to build HTTP client".to_string())
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_token,
        })
    }

    fn url(&self, call_id: &CallId, operation: &str) -> String {
        format!("{}/api/v1/calls/{}/{}", self.base_url, call_id, operation)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.service_token.expose_secret())
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    #[instrument(skip_all, fields(call_id = %call_id))]
    async fn issue_token(
        &self,
        call_id: &CallId,
        channel_name: Option<&str>,
        ttl_seconds: u32,
    ) -> Result<ChannelCredentials, CallError> {
        let request = TokenRequest {
            channel_name,
            ttl_seconds,
        };

        let response = self
            .client
            .post(self.url(call_id, "token"))
            .header("Authorization", self.bearer())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "session.services.session_api", error = %e, "Token request failed");
                CallError::TokenIssuanceFailed("session service is unavailable".to_string())
            })?;

        let response = check_status(response, CallError::TokenIssuanceFailed).await?;

        let body: TokenResponse = response.json().await.map_err(|e| {
            error!(target: "session.services.session_api", error = %e, "Failed to parse token response");
            CallError::TokenIssuanceFailed("malformed token response".to_string())
        })?;

        Ok(ChannelCredentials {
            token: SecretString::from(body.token),
            channel_name: body.channel_name,
            uid: Uid(body.uid),
        })
    }

    #[instrument(skip_all, fields(call_id = %call_id))]
    async fn complete_call(&self, call_id: &CallId, notes: &str) -> Result<(), CallError> {
        let response = self
            .client
            .post(self.url(call_id, "complete"))
            .header("Authorization", self.bearer())
            .json(&CompleteCallRequest { notes })
            .send()
            .await
            .map_err(|e| {
                warn!(target: "session.services.session_api", error = %e, "Completion request failed");
                CallError::NotesPersistenceFailed("session service is unavailable".to_string())
            })?;

        check_status(response, CallError::NotesPersistenceFailed).await?;
        Ok(())
    }
}

/// Map non-success statuses to `make_error`, keeping the body message for 4xx.
async fn check_status(
    response: reqwest::Response,
    make_error: fn(String) -> CallError,
) -> Result<reqwest::Response, CallError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    if status.is_server_error() {
        warn!(target: "session.services.session_api", status = %status, "Session API returned server error");
        return Err(make_error("session service is unavailable".to_string()));
    }

    if status == StatusCode::UNAUTHORIZED {
        error!(target: "session.services.session_api", "Service token rejected by session API");
        return Err(make_error("not authorized".to_string()));
    }

    let message = response
        .json::<ApiErrorBody>()
        .await
        .map(|body| body.message)
        .unwrap_or_else(|_| format!("request rejected ({})", status.as_u16()));
    warn!(
        target: "session.services.session_api",
        status = %status,
        message = %message,
        "Session API rejected request"
    );
    Err(make_error(message))
}

pub mod mock {
    //! In-memory [`SessionApi`] for tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// Default uid handed out by the mock.
    pub const MOCK_LOCAL_UID: Uid = Uid(1001);

    /// Mock session API.
    ///
    /// Issues `token-N` credentials unless scripted otherwise and records
    /// every completion.
    pub struct MockSessionApi {
        issue_results: Mutex<VecDeque<Result<ChannelCredentials, CallError>>>,
        issue_count: AtomicUsize,
        fail_issue: bool,
        fail_completion: bool,
        issue_delay: Mutex<Duration>,
        completions: Mutex<Vec<(CallId, String)>>,
        issue_requests: Mutex<Vec<(CallId, Option<String>)>>,
    }

    impl MockSessionApi {
        fn build(fail_issue: bool, fail_completion: bool) -> Self {
            Self {
                issue_results: Mutex::new(VecDeque::new()),
                issue_count: AtomicUsize::new(0),
                fail_issue,
                fail_completion,
                issue_delay: Mutex::new(Duration::ZERO),
                completions: Mutex::new(Vec::new()),
                issue_requests: Mutex::new(Vec::new()),
            }
        }

        /// Create a mock that always succeeds.
        #[must_use]
        pub fn accepting() -> Self {
            Self::build(false, false)
        }

        /// Create a mock whose token issuance always fails.
        #[must_use]
        pub fn failing_issue() -> Self {
            Self::build(true, false)
        }

        /// Create a mock whose call completion always fails.
        #[must_use]
        pub fn failing_completion() -> Self {
            Self::build(false, true)
        }

        /// Create a mock that answers token requests with `results` in
        /// order, then falls back to issuing normally.
        #[must_use]
        pub fn with_issue_results(results: Vec<Result<ChannelCredentials, CallError>>) -> Self {
            let mock = Self::build(false, false);
            *lock(&mock.issue_results) = results.into();
            mock
        }

        /// Delay applied to every subsequent token request.
        pub fn set_issue_delay(&self, delay: Duration) {
            *lock(&self.issue_delay) = delay;
        }

        /// Number of token requests made.
        pub fn issue_count(&self) -> usize {
            self.issue_count.load(Ordering::SeqCst)
        }

        /// Channel names requested, in order.
        pub fn issue_requests(&self) -> Vec<(CallId, Option<String>)> {
            lock(&self.issue_requests).clone()
        }

        /// Recorded completions, in order.
        pub fn completions(&self) -> Vec<(CallId, String)> {
            lock(&self.completions).clone()
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[async_trait]
    impl SessionApi for MockSessionApi {
        async fn issue_token(
            &self,
            call_id: &CallId,
            channel_name: Option<&str>,
            _ttl_seconds: u32,
        ) -> Result<ChannelCredentials, CallError> {
            let count = self.issue_count.fetch_add(1, Ordering::SeqCst) + 1;
            lock(&self.issue_requests).push((call_id.clone(), channel_name.map(str::to_string)));

            let delay = *lock(&self.issue_delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if let Some(result) = lock(&self.issue_results).pop_front() {
                return result;
            }

            if self.fail_issue {
                return Err(CallError::TokenIssuanceFailed(
                    "Mock session API error".to_string(),
                ));
            }

            Ok(ChannelCredentials {
                token: SecretString::from(format!("token-{count}")),
                channel_name: channel_name
                    .map_or_else(|| format!("channel-{call_id}"), str::to_string),
                uid: MOCK_LOCAL_UID,
            })
        }

        async fn complete_call(&self, call_id: &CallId, notes: &str) -> Result<(), CallError> {
            lock(&self.completions).push((call_id.clone(), notes.to_string()));
            if self.fail_completion {
                return Err(CallError::NotesPersistenceFailed(
                    "Mock session API error".to_string(),
                ));
            }
            Ok(())
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used, clippy::expect_used)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_issues_sequential_tokens() {
            let api = MockSessionApi::accepting();
            let call_id = CallId::new("booking-1");

            let first = api.issue_token(&call_id, None, 3600).await.unwrap();
            let second = api
                .issue_token(&call_id, Some("consult-1"), 3600)
                .await
                .unwrap();

            assert_eq!(first.token.expose_secret(), "token-1");
            assert_eq!(first.channel_name, "channel-booking-1");
            assert_eq!(second.token.expose_secret(), "token-2");
            assert_eq!(second.channel_name, "consult-1");
            assert_eq!(api.issue_count(), 2);
            assert_eq!(
                api.issue_requests(),
                vec![
                    (call_id.clone(), None),
                    (call_id, Some("consult-1".to_string()))
                ]
            );
        }

        #[tokio::test]
        async fn test_mock_scripted_then_default() {
            let api = MockSessionApi::with_issue_results(vec![Err(
                CallError::TokenIssuanceFailed("booking closed".to_string()),
            )]);
            let call_id = CallId::new("booking-1");

            assert!(api.issue_token(&call_id, None, 60).await.is_err());
            assert!(api.issue_token(&call_id, None, 60).await.is_ok());
        }

        #[tokio::test]
        async fn test_mock_failing_completion_still_records() {
            let api = MockSessionApi::failing_completion();
            let call_id = CallId::new("booking-1");

            let result = api.complete_call(&call_id, "notes").await;

            assert!(matches!(result, Err(CallError::NotesPersistenceFailed(_))));
            assert_eq!(api.completions(), vec![(call_id, "notes".to_string())]);
        }
    }
}
