#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! `robot-api` binary: loads config and the shared token, then serves the
//! router from [`robot_api::app`] until SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::path::Path;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use robot_api::util::expand_tilde;
use robot_api::{ApiToken, AppState, Config};

/// On-robot API: live log tailing and device management.
#[derive(Parser)]
#[command(name = "robot-api", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WS server (default when no subcommand given).
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve) | None => run_server(cli.config.as_deref()).await,
    }
}

async fn run_server(config_path: Option<&str>) {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("robot-api: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("robot-api v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Log upstream: {}", config.logs.upstream_url);

    let token_path = expand_tilde(&config.auth.token_path).into_owned();
    let token = match ApiToken::load_or_create(Path::new(&token_path)) {
        Ok(token) => token,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    if !config.auth.trust_local_networks {
        info!("Local-network trust disabled, every request needs the bearer token");
    }
    if config.auth.allowed_origins.is_empty() {
        info!("No CORS origins configured");
    } else {
        info!("CORS origins: {}", config.auth.allowed_origins.join(", "));
    }

    let listen = config.server.listen.clone();
    let state = AppState::new(config, token);
    let app = robot_api::app(state);

    let listener = match TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {listen}: {e}");
            std::process::exit(1);
        }
    };

    info!("Listening on {listen}");

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    if let Err(e) = result {
        error!("Server error: {e}");
        std::process::exit(1);
    }
    info!("Goodbye");
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
