//! `GET /stats`: CPU, memory and temperature snapshot.

use axum::Json;

use crate::system::stats::{self, SystemStats};

pub async fn get_stats() -> Json<SystemStats> {
    Json(stats::collect().await)
}
