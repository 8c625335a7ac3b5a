//! Session Controller Library
//!
//! Client-side controller for governed, time-boxed two-party video
//! consultations between a clinician and a patient:
//!
//! - Call lifecycle state machine (`Idle -> Connecting -> Connected <-> Disconnected -> Ended`)
//! - Fixed consultation budget with a one-second countdown
//! - Automatic reconnection with backoff and fresh credentials
//! - Role-specific end-of-call behavior (clinician notes, patient auto-end)
//! - A narrow adapter over the native media engine
//!
//! # Architecture
//!
//! ```text
//! UI ──commands──> SessionControllerHandle ──mpsc──> SessionControllerActor
//!  ^                                                   │        ^
//!  └──────────── watch<SessionSnapshot> ───────────────┘        │
//!                                                               │ event bridge
//!                MediaEngine <── MediaEngineAdapter ── CallbackSink
//!                SessionApi (token issuance, call completion)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Controller actor, call session and message types
//! - [`config`] - Configuration from environment
//! - [`countdown`] - Consultation countdown
//! - [`engine`] - Media engine trait, adapter and mock
//! - [`errors`] - Error types with user-presentable messages
//! - [`events`] - Typed engine notifications and the event bridge
//! - [`observability`] - Tracing setup and metrics
//! - [`policy`] - Per-role end-of-call policy
//! - [`services`] - Session API client

pub mod actors;
pub mod config;
pub mod countdown;
pub mod engine;
pub mod errors;
pub mod events;
pub mod observability;
pub mod policy;
pub mod services;

pub use actors::{
    CallState, NavigationIntent, SessionControllerHandle, SessionMetrics, SessionSnapshot,
};
pub use errors::CallError;
pub use policy::Role;
