#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::unused_async)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! # robot-api
//!
//! On-robot HTTP/WebSocket API: live log tailing bridged to a Loki-compatible
//! tail endpoint, plus a few device-management routes for the web console.
//!
//! ## API surface
//!
//! | Method | Path          | Auth | Description                             |
//! |--------|---------------|------|-----------------------------------------|
//! | GET    | `/health`     | No   | Liveness check                          |
//! | GET    | `/logs/tail`  | Yes* | WebSocket live log tail                 |
//! | GET    | `/wifi`       | Yes  | Wifi client configuration and state     |
//! | POST   | `/wifi`       | Yes  | Set SSID/PSK, switch to client mode     |
//! | POST   | `/wifi/clear` | Yes  | Drop wifi config, switch to hotspot     |
//! | GET    | `/stats`      | Yes  | CPU, memory and temperature             |
//!
//! "Yes" means: trusted-network peer, or `Authorization: Bearer <token>`.
//! *The tail WebSocket reports auth failures as close code `1008` instead of
//! an HTTP status.
//!
//! ## Architecture
//!
//! ```text
//! main.rs           entry point, clap subcommands, graceful shutdown
//! config.rs         TOML + env-var configuration
//! token.rs          shared bearer token file (load or create)
//! auth.rs           trusted-network check, bearer validation, middleware
//! logs/
//!   query.rs        selector resolution, upstream tail URL
//!   upstream.rs     outbound WebSocket dial
//!   relay.rs        RelayEngine: upstream → client pump, keep-alive
//!   mod.rs          /logs/tail handler and session orchestration
//! system/
//!   wifi.rs         wifi.conf read/write, mode switch, iwgetid
//!   stats.rs        /proc and sysfs sampling
//! routes/           REST handlers
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod logs;
pub mod routes;
pub mod state;
pub mod system;
pub mod token;
pub mod util;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub use config::Config;
pub use state::AppState;
pub use token::ApiToken;

/// Build the full router.
///
/// Handlers extract `ConnectInfo<SocketAddr>`, so serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn app(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(routes::health::health))
        .route("/logs/tail", get(logs::tail));

    let authed_routes = Router::new()
        .route(
            "/wifi",
            get(routes::wifi::get_wifi).post(routes::wifi::set_wifi),
        )
        .route("/wifi/clear", post(routes::wifi::clear_wifi))
        .route("/stats", get(routes::stats::get_stats))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let mut app = Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = cors_layer(&state.config.auth.allowed_origins) {
        app = app.layer(cors);
    }

    app.with_state(state)
}

/// CORS for the configured origins, `None` when the list is empty.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {origin:?}");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any),
    )
}
