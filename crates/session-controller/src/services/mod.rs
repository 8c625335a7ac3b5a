//! External service clients used by the session controller.

pub mod session_api;

pub use session_api::{ChannelCredentials, HttpSessionApi, SessionApi};
