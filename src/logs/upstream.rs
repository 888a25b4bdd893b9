//! Outbound connection to the Loki-compatible tail endpoint.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::DialError;

/// An established upstream tail connection.
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the upstream WebSocket at `url`.
///
/// With `timeout = None` the dial is bounded only by the OS/TLS defaults.
pub async fn dial(url: &str, timeout: Option<Duration>) -> Result<UpstreamSocket, DialError> {
    let connect = tokio_tungstenite::connect_async(url);
    let (socket, response) = match timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| DialError::Timeout(limit))??,
        None => connect.await?,
    };
    debug!(status = %response.status(), "Upstream tail connected");
    Ok(socket)
}
