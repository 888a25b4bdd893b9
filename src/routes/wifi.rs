//! Wifi configuration endpoints.
//!
//! - `GET /wifi`: current configuration and association state
//! - `POST /wifi`: store SSID/PSK and switch to client mode
//! - `POST /wifi/clear`: drop the configuration and switch back to hotspot
//!
//! Failures are logged in full; clients only get a fixed message.

use std::path::PathBuf;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::error;

use crate::error::SystemError;
use crate::system::wifi::{self, WifiRequest, WifiStatus};
use crate::util::expand_tilde;
use crate::AppState;

type ApiError = (StatusCode, Json<Value>);

fn conf_path(state: &AppState) -> PathBuf {
    PathBuf::from(expand_tilde(&state.config.wifi.conf_path).as_ref())
}

fn internal(message: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": message})),
    )
}

fn switch_failed(e: &SystemError) -> ApiError {
    error!("Wifi mode switch failed: {e}");
    internal("wifi switch failed")
}

/// `GET /wifi`
pub async fn get_wifi(State(state): State<AppState>) -> Result<Json<WifiStatus>, ApiError> {
    wifi::status(&conf_path(&state)).await.map(Json).map_err(|e| {
        error!("Failed to read wifi config: {e}");
        internal("failed to read wifi config")
    })
}

/// `POST /wifi`
///
/// # Errors
///
/// - `400 Bad Request`: empty `ssid`
/// - `500 Internal Server Error`: config write or mode switch failed
pub async fn set_wifi(
    State(state): State<AppState>,
    Json(body): Json<WifiRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.ssid.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "ssid must not be empty"})),
        ));
    }

    wifi::write_conf(&conf_path(&state), &body.ssid, body.psk.as_deref())
        .await
        .map_err(|e| {
            error!("Failed to write wifi config: {e}");
            internal("failed to write wifi config")
        })?;
    wifi::run_switch(&state.config.wifi.switch_cmd)
        .await
        .map_err(|e| switch_failed(&e))?;

    Ok(Json(json!({"status": "ok"})))
}

/// `POST /wifi/clear`
pub async fn clear_wifi(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    wifi::clear_conf(&conf_path(&state)).await.map_err(|e| {
        error!("Failed to clear wifi config: {e}");
        internal("failed to clear wifi config")
    })?;
    wifi::run_switch(&state.config.wifi.switch_cmd)
        .await
        .map_err(|e| switch_failed(&e))?;

    Ok(Json(json!({"status": "ok"})))
}
