//! # Session Test Utilities
//!
//! Shared test utilities for the session controller.
//!
//! The mock engine and mock session API live next to their traits in
//! `session-controller` (`engine::mock`, `services::session_api::mock`).
//! This crate wires them into a running controller.
//!
//! ## Modules
//!
//! - `fixtures` - Pre-configured test data (calls, credentials, settings)
//! - `harness` - A spawned controller with mock collaborators
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let harness = SessionHarness::builder().build();
//!     let call = TestCall::patient();
//!
//!     harness.start(&call).await.unwrap();
//!     harness.wait_for(|s| s.state == CallState::Connected).await;
//! }
//! ```

pub mod fixtures;
pub mod harness;

// Re-export commonly used items
pub use fixtures::*;
pub use harness::*;
