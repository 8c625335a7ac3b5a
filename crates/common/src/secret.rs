//! Secret types for keeping credentials out of logs.
//!
//! Re-exports the [`secrecy`] types. Channel tokens issued by the session API
//! and the bearer token used to call that API are both wrapped in
//! `SecretString`, so structs holding them can derive `Debug` and still be
//! passed to `tracing` fields safely.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ChannelCredentials {
//!     channel_name: String,
//!     token: SecretString,
//! }
//!
//! let creds = ChannelCredentials {
//!     channel_name: "consult-17".to_string(),
//!     token: SecretString::from("006abc"),
//! };
//!
//! // Debug output redacts the token
//! assert!(!format!("{creds:?}").contains("006abc"));
//!
//! // The engine needs the raw value, which must be asked for explicitly
//! let raw: &str = creds.token.expose_secret();
//! assert_eq!(raw, "006abc");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
