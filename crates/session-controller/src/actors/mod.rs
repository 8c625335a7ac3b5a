//! Actor model implementation for the session controller.
//!
//! ```text
//! SessionControllerActor (one per app process)
//! ├── owns CallSession (state machine, countdown, participants)
//! ├── owns MediaEngineAdapter (sole caller of the media engine)
//! └── drains the event bridge fed by the engine's callback sink
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer**: every mutation of call state happens on the actor task
//! - **Message passing**: UI commands via `tokio::sync::mpsc`, replies via oneshot
//! - **Observable state**: snapshots published on a `tokio::sync::watch`
//! - **Mailbox monitoring**: depth thresholds with metrics (16/64)
//!
//! # Modules
//!
//! - [`controller`] - `SessionControllerActor` and its handle
//! - [`messages`] - Message and snapshot types
//! - [`metrics`] - Mailbox monitoring and call counters
//! - [`session`] - `CallSession` and the call state graph

pub mod controller;
pub mod messages;
pub mod metrics;
pub mod session;

// Re-export primary types
pub use controller::SessionControllerHandle;
pub use messages::*;
pub use metrics::{MailboxMonitor, SessionMetrics, SessionMetricsSnapshot};
pub use session::{CallSession, CallState, ChannelCredentials, RemoteMedia};
