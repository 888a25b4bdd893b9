//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::token::ApiToken;

/// Shared application state for the robot API.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Shared bearer token, loaded once at startup.
    pub token: ApiToken,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Config, token: ApiToken) -> Self {
        Self {
            config: Arc::new(config),
            token,
            start_time: Instant::now(),
        }
    }
}
