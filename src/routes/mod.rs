//! HTTP route handlers.
//!
//! All handlers except [`health`] sit behind the
//! [`crate::auth::require_auth`] middleware. The log-tail WebSocket lives in
//! [`crate::logs`] since it authenticates on its own.

pub mod health;
pub mod stats;
pub mod wifi;
