//! Live log tailing: `GET /logs/tail` bridged to the upstream Loki tail API.
//!
//! ## Connection lifecycle
//!
//! 1. The stream selector is resolved from `query` (or its alias `selector`).
//!    Missing → close `1002`.
//! 2. Trusted-network peers pass; others need `Authorization: Bearer <token>`.
//!    Failure → close `1008`.
//! 3. The upstream tail URL is built and dialed. Failure → error payload,
//!    close `1011`.
//! 4. The [`relay::RelayEngine`] pumps upstream frames to the client until one
//!    side finishes.
//! 5. Upstream close, end of stream, reset or missed pong → close `1000`.
//!    Client gone → nothing left to send. A panic inside the relay →
//!    error payload, close `1011`.
//!
//! Steps 1 and 2 are decided before any session work starts. The upgrade is
//! still completed on rejection since a close code can only be delivered over
//! an open WebSocket.
//!
//! ## Server → client messages
//!
//! | Frame            | Content                                              |
//! |------------------|------------------------------------------------------|
//! | text / binary    | upstream tail frames, verbatim                       |
//! | text (error)     | `{"type":"error","message":"log provider unavailable"}` |
//! | text (error)     | `{"type":"error","message":"internal log relay error"}` |

pub mod query;
pub mod relay;
pub mod upstream;

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
};
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use serde_json::json;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::{self, Admission, AuthRejection};
use crate::AppState;

use self::query::{build_tail_url, TailRequest};
use self::relay::{KeepAlive, RelayEngine, RelayOutcome, RelayPhase};

/// Sent before closing when the upstream can't be reached.
pub const PROVIDER_UNAVAILABLE: &str = "log provider unavailable";
/// Sent before closing when the relay itself breaks.
pub const INTERNAL_RELAY_ERROR: &str = "internal log relay error";

/// Why a connection is turned away before relaying starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailRejection {
    MissingSelector,
    Unauthorized(AuthRejection),
}

impl TailRejection {
    pub fn close_code(self) -> u16 {
        match self {
            Self::MissingSelector => close_code::PROTOCOL,
            Self::Unauthorized(_) => close_code::POLICY,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::MissingSelector => "query parameter required",
            Self::Unauthorized(rejection) => rejection.message(),
        }
    }
}

/// Everything one admitted session needs.
#[derive(Debug)]
pub struct TailSession {
    pub id: Uuid,
    pub admission: Admission,
    pub request: TailRequest,
    /// Upstream tail URL, built once per session.
    pub target: String,
}

/// Resolve parameters and run the auth gate. Pure; no I/O.
///
/// The selector check runs first so a malformed request is reported as such
/// even from an untrusted peer.
pub fn admit(
    state: &AppState,
    peer: &SocketAddr,
    params: &[(String, String)],
    headers: &HeaderMap,
) -> Result<TailSession, TailRejection> {
    let request = TailRequest::from_pairs(params).ok_or(TailRejection::MissingSelector)?;

    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let admission = auth::authorize(
        &peer.ip().to_string(),
        header,
        &state.token,
        state.config.auth.trust_local_networks,
    )
    .map_err(TailRejection::Unauthorized)?;

    let target = build_tail_url(&state.config.logs.upstream_url, &request);
    Ok(TailSession {
        id: Uuid::new_v4(),
        admission,
        request,
        target,
    })
}

/// `GET /logs/tail?query=<selector>[&limit=&start=&delay_for=]`: WebSocket
/// upgrade for live log tailing.
pub async fn tail(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    match admit(&state, &peer, &params, &headers) {
        Ok(session) => {
            let span = info_span!(
                "log_tail",
                session = %session.id,
                %peer,
                phase = %RelayPhase::Connecting
            );
            ws.on_upgrade(move |socket| run_session(socket, state, session).instrument(span))
        }
        Err(rejection) => {
            warn!(%peer, "Log tail rejected: {}", rejection.reason());
            let close_timeout = state.config.logs.close_timeout();
            ws.on_upgrade(move |socket| async move {
                let (mut tx, mut rx) = socket.split();
                close_client(
                    &mut tx,
                    &mut rx,
                    rejection.close_code(),
                    rejection.reason(),
                    close_timeout,
                )
                .await;
            })
        }
    }
}

/// Drive one admitted session to completion.
async fn run_session(socket: WebSocket, state: AppState, session: TailSession) {
    let logs = &state.config.logs;
    let close_timeout = logs.close_timeout();
    let (mut client_tx, mut client_rx) = socket.split();

    info!(
        selector = %session.request.combined_selector(),
        admission = session.admission.as_str(),
        "Log tail session started"
    );
    debug!(target_url = %session.target, "Dialing upstream");

    let upstream = match upstream::dial(&session.target, logs.dial_timeout()).await {
        Ok(socket) => socket,
        Err(e) => {
            error!("Unable to connect to log provider: {e}");
            send_error(&mut client_tx, PROVIDER_UNAVAILABLE).await;
            close_client(
                &mut client_tx,
                &mut client_rx,
                close_code::ERROR,
                PROVIDER_UNAVAILABLE,
                close_timeout,
            )
            .await;
            return;
        }
    };

    let engine = RelayEngine::new(upstream, KeepAlive::from(logs), close_timeout);
    let relayed = AssertUnwindSafe(engine.run(&mut client_tx, &mut client_rx))
        .catch_unwind()
        .await;

    let outcome = match relayed {
        Ok(outcome) => outcome,
        Err(_) => {
            error!("Log relay panicked");
            send_error(&mut client_tx, INTERNAL_RELAY_ERROR).await;
            close_client(
                &mut client_tx,
                &mut client_rx,
                close_code::ERROR,
                INTERNAL_RELAY_ERROR,
                close_timeout,
            )
            .await;
            return;
        }
    };

    match &outcome {
        RelayOutcome::UpstreamClosed(_) | RelayOutcome::UpstreamEnded => {
            info!("Upstream closed the tail, ending session");
        }
        RelayOutcome::UpstreamLost(e) => warn!("Upstream tail lost, ending session: {e}"),
        RelayOutcome::DownstreamClosed => info!("Client disconnected"),
        RelayOutcome::DownstreamLost(e) => debug!("Client went away mid-write: {e}"),
    }

    if outcome.downstream_alive() {
        close_client(&mut client_tx, &mut client_rx, close_code::NORMAL, "", close_timeout).await;
    }
}

/// Send the structured `{"type":"error"}` payload. Best effort.
async fn send_error<Tx>(client_tx: &mut Tx, message: &str)
where
    Tx: Sink<Message, Error = axum::Error> + Unpin,
{
    let payload = json!({"type": "error", "message": message}).to_string();
    if let Err(e) = client_tx.send(Message::Text(payload.into())).await {
        debug!("Failed to send error payload: {e}");
    }
}

/// Send a close frame and wait (bounded) for the client to acknowledge it.
async fn close_client<Tx, Rx>(
    client_tx: &mut Tx,
    client_rx: &mut Rx,
    code: u16,
    reason: &str,
    timeout: Duration,
) where
    Tx: Sink<Message, Error = axum::Error> + Unpin,
    Rx: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = client_tx.send(Message::Close(Some(frame))).await {
        debug!("Failed to send close frame: {e}");
        return;
    }
    let drain = async { while let Some(Ok(_)) = client_rx.next().await {} };
    if tokio::time::timeout(timeout, drain).await.is_err() {
        debug!("Client did not acknowledge close within {timeout:?}");
    }
}
