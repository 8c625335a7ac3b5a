//! Session controller error types.
//!
//! Every error carries enough detail for server-side logs; the UI only ever
//! sees [`CallError::client_message`], which never includes engine codes,
//! URLs or credential material.

use thiserror::Error;

/// Session controller error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// `join_channel` was attempted before `initialize_engine` (sequencing bug).
    #[error("Media engine is not initialized")]
    EngineNotInitialized,

    /// The engine rejected a join (bad/expired token, unreachable network).
    #[error("Join failed with engine code {0}")]
    JoinFailed(i32),

    /// The session API could not issue channel credentials.
    #[error("Token issuance failed: {0}")]
    TokenIssuanceFailed(String),

    /// The session API could not record call completion notes.
    #[error("Notes persistence failed: {0}")]
    NotesPersistenceFailed(String),

    /// A call is already active on this controller.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The operation needs an active call and there is none.
    #[error("No active call")]
    NoActiveCall,

    /// Internal error (actor mailbox closed, task failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallError {
    /// Returns a user-presentable message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CallError::EngineNotInitialized | CallError::Internal(_) => {
                "Something went wrong starting the call".to_string()
            }
            CallError::JoinFailed(_) => {
                "Could not connect to the call. Check your connection and try again".to_string()
            }
            CallError::TokenIssuanceFailed(_) => {
                "Could not get access to the call. Please try again".to_string()
            }
            CallError::NotesPersistenceFailed(_) => {
                "The call ended but your notes could not be saved".to_string()
            }
            CallError::Conflict(msg) => msg.clone(),
            CallError::NoActiveCall => "There is no active call".to_string(),
        }
    }
}
