//! Error types shared across modules.
//!
//! None of these are ever serialized to clients verbatim: handlers log the
//! detail and answer with a fixed, generic message.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure while loading configuration at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Failure while loading or creating the shared API token.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to read token file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write token file '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("token file '{path}' is empty")]
    Empty { path: String },
}

/// Failure while opening the upstream log-tail connection.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("upstream dial timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream connection failed: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Cause recorded when a relay session ends abnormally.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("upstream read failed: {0}")]
    UpstreamRead(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("upstream write failed: {0}")]
    UpstreamWrite(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("downstream write failed: {0}")]
    DownstreamWrite(#[source] axum::Error),

    #[error("no pong from upstream within {0:?}")]
    KeepAliveTimeout(Duration),
}

/// Failure in one of the device-management helpers (wifi, stats).
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("command {command} exited with {status}")]
    CommandFailed { command: String, status: String },
}

impl SystemError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
