//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `ROBOT_API_LISTEN`, `ROBOT_API_PORT`,
//!    `ROBOT_API_TOKEN_PATH`, `ROBOT_API_ALLOWED_ORIGINS`,
//!    `ALLOY_LOKI_TAIL_URL`, `WIFI_CONF_PATH`, `WIFI_SWITCH_CMD`
//! 2. **Config file**: path via `--config <path>`, or `robot-api.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8082"
//!
//! [auth]
//! token_path = "/var/lib/polyflow/api_token"
//! trust_local_networks = true
//! allowed_origins = ["http://robot.local:5173"]
//!
//! [logs]
//! upstream_url = "ws://127.0.0.1:3100/loki/api/v1/tail"
//! ping_interval_secs = 20
//! pong_timeout_secs = 20
//! dial_timeout_secs = 10      # 0 = no bound
//! close_timeout_secs = 2
//!
//! [wifi]
//! conf_path = "/var/lib/polyflow/wifi.conf"
//! switch_cmd = "/run/current-system/sw/bin/polyflow-wifi-mode"
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Config file looked up in the current directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "robot-api.toml";

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub wifi: WifiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8082`).
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// File holding the shared bearer token. Created with a fresh random
    /// token on first start. Override with `ROBOT_API_TOKEN_PATH`.
    #[serde(default = "default_token_path")]
    pub token_path: String,
    /// Let loopback, private and link-local peers in without a token
    /// (default true). Turn off when running behind a local reverse proxy.
    #[serde(default = "default_trust_local_networks")]
    pub trust_local_networks: bool,
    /// CORS origins allowed to call the API. Empty disables the CORS layer.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Upstream log-tail settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
    /// Base WebSocket address of the Loki-compatible tail endpoint.
    /// Override with `ALLOY_LOKI_TAIL_URL`.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    /// Seconds between keep-alive pings sent upstream (default 20).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Seconds to wait for the matching pong before giving up (default 20).
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
    /// Upper bound on the upstream dial + handshake, 0 disables (default 10).
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
    /// Upper bound on sending our close frame upstream (default 2).
    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: u64,
}

/// Wifi management settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WifiConfig {
    /// Shell-style `KEY=value` file read by the network mode switch.
    #[serde(default = "default_wifi_conf_path")]
    pub conf_path: String,
    /// Executable that applies the wifi configuration.
    #[serde(default = "default_wifi_switch_cmd")]
    pub switch_cmd: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:8082".to_string()
}
fn default_token_path() -> String {
    "/var/lib/polyflow/api_token".to_string()
}
fn default_trust_local_networks() -> bool {
    true
}
fn default_upstream_url() -> String {
    "ws://127.0.0.1:3100/loki/api/v1/tail".to_string()
}
fn default_ping_interval() -> u64 {
    20
}
fn default_pong_timeout() -> u64 {
    20
}
fn default_dial_timeout() -> u64 {
    10
}
fn default_close_timeout() -> u64 {
    2
}
fn default_wifi_conf_path() -> String {
    "/var/lib/polyflow/wifi.conf".to_string()
}
fn default_wifi_switch_cmd() -> String {
    "/run/current-system/sw/bin/polyflow-wifi-mode".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_path: default_token_path(),
            trust_local_networks: default_trust_local_networks(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            upstream_url: default_upstream_url(),
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            dial_timeout_secs: default_dial_timeout(),
            close_timeout_secs: default_close_timeout(),
        }
    }
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            conf_path: default_wifi_conf_path(),
            switch_cmd: default_wifi_switch_cmd(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogsConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// `None` when the dial is left to the transport's own timeouts.
    pub fn dial_timeout(&self) -> Option<Duration> {
        (self.dial_timeout_secs > 0).then(|| Duration::from_secs(self.dial_timeout_secs))
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise looks for
    /// [`DEFAULT_CONFIG_FILE`] in the current directory, falling back to
    /// compiled defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Apply env var overrides, reading variables through `lookup`.
    fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(listen) = lookup("ROBOT_API_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(port) = lookup("ROBOT_API_PORT") {
            let port: u16 = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "ROBOT_API_PORT",
                value: port.clone(),
            })?;
            let host = self
                .server
                .listen
                .rsplit_once(':')
                .map_or("0.0.0.0", |(host, _)| host);
            self.server.listen = format!("{host}:{port}");
        }
        if let Some(path) = lookup("ROBOT_API_TOKEN_PATH") {
            self.auth.token_path = path;
        }
        if let Some(raw) = lookup("ROBOT_API_ALLOWED_ORIGINS") {
            self.auth.allowed_origins = parse_origin_list(&raw);
        }
        if let Some(url) = lookup("ALLOY_LOKI_TAIL_URL") {
            self.logs.upstream_url = url;
        }
        if let Some(path) = lookup("WIFI_CONF_PATH") {
            self.wifi.conf_path = path;
        }
        if let Some(cmd) = lookup("WIFI_SWITCH_CMD") {
            self.wifi.switch_cmd = cmd;
        }
        Ok(())
    }
}

/// Split a comma-separated origin list, dropping blanks and duplicates.
pub fn parse_origin_list(raw: &str) -> Vec<String> {
    let mut origins: Vec<String> = Vec::new();
    for origin in raw.split(',').map(str::trim).filter(|o| !o.is_empty()) {
        if !origins.iter().any(|o| o == origin) {
            origins.push(origin.to_string());
        }
    }
    origins
}
