//! Relay engine: one upstream tail connection pumped into one client socket.
//!
//! ## Phases
//!
//! ```text
//! Connecting ──► Relaying ──► Closing ──► Closed
//!                   │            ▲
//!                   └── error ───┘   (cause kept in the outcome)
//! ```
//!
//! `Connecting` belongs to the caller (it owns the dial). While `Relaying`,
//! two futures race inside one `tokio::select!`:
//!
//! - the **forward pump** reads upstream frames and writes them to the client
//!   unchanged (text stays text, binary stays binary), and keeps the upstream
//!   alive with ping/pong;
//! - the **disconnect watcher** reads the client side until it sends a close
//!   frame, hits end of stream or errors.
//!
//! Whichever finishes first decides the [`RelayOutcome`]; the other future is
//! dropped on the spot, so no reader or writer outlives [`RelayEngine::run`].
//!
//! An upstream that errors, resets or stops answering pings is treated like
//! one that closed: the cause is kept in [`RelayOutcome::UpstreamLost`] for
//! logging and the client sees a normal close.

use std::fmt;
use std::time::Duration;

use axum::extract::ws::Message as ClientMessage;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, protocol::CloseFrame, Message as UpstreamMessage};
use tracing::{debug, field, trace, Span};

use crate::config::LogsConfig;
use crate::error::RelayError;

/// Upstream liveness probing.
#[derive(Debug, Clone, Copy)]
pub struct KeepAlive {
    /// How often to ping the upstream. Zero turns probing off.
    pub ping_interval: Duration,
    /// How long a ping may go unanswered before the upstream counts as dead.
    pub pong_timeout: Duration,
}

impl From<&LogsConfig> for KeepAlive {
    fn from(config: &LogsConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
        }
    }
}

/// Where a session is in its lifecycle.
///
/// Only used for diagnostics: each change is recorded on the current span's
/// `phase` field. `Connecting` covers the caller's dial, so the session span
/// starts in it and the engine takes over from `Relaying`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Connecting,
    Relaying,
    Closing,
    Closed,
}

impl fmt::Display for RelayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Relaying => "relaying",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}

/// How a relay session ended.
#[derive(Debug)]
pub enum RelayOutcome {
    /// Upstream stream ended without a close frame.
    UpstreamEnded,
    /// Upstream sent a close frame.
    UpstreamClosed(Option<CloseFrame>),
    /// Upstream connection broke: read/write error or missed pong.
    UpstreamLost(RelayError),
    /// The client sent a close frame or its stream ended.
    DownstreamClosed,
    /// Writing to the client failed.
    DownstreamLost(RelayError),
}

impl RelayOutcome {
    /// Whether the client socket can still be written to.
    pub fn downstream_alive(&self) -> bool {
        !matches!(self, Self::DownstreamClosed | Self::DownstreamLost(_))
    }
}

/// Owns the upstream connection for the lifetime of one relay session.
pub struct RelayEngine<U> {
    upstream: U,
    keep_alive: KeepAlive,
    close_timeout: Duration,
    phase: RelayPhase,
}

impl<U> RelayEngine<U>
where
    U: Stream<Item = Result<UpstreamMessage, tungstenite::Error>>
        + Sink<UpstreamMessage, Error = tungstenite::Error>
        + Unpin,
{
    /// Wrap a freshly dialed upstream connection.
    pub fn new(upstream: U, keep_alive: KeepAlive, close_timeout: Duration) -> Self {
        Self {
            upstream,
            keep_alive,
            close_timeout,
            phase: RelayPhase::Connecting,
        }
    }

    fn enter(&mut self, phase: RelayPhase) {
        trace!(from = %self.phase, to = %phase, "Relay phase change");
        Span::current().record("phase", field::display(phase));
        self.phase = phase;
    }

    /// Relay until either side finishes, then shut the upstream down.
    ///
    /// Never fails: errors are folded into the outcome. The client
    /// socket is left open so the caller can choose the close code.
    pub async fn run<Tx, Rx>(mut self, client_tx: &mut Tx, client_rx: &mut Rx) -> RelayOutcome
    where
        Tx: Sink<ClientMessage, Error = axum::Error> + Unpin,
        Rx: Stream<Item = Result<ClientMessage, axum::Error>> + Unpin,
    {
        self.enter(RelayPhase::Relaying);

        let keep_alive = self.keep_alive;
        let outcome = tokio::select! {
            outcome = forward(&mut self.upstream, client_tx, keep_alive) => outcome,
            () = wait_for_disconnect(client_rx) => RelayOutcome::DownstreamClosed,
        };

        self.enter(RelayPhase::Closing);
        self.close_upstream(&outcome).await;
        self.enter(RelayPhase::Closed);

        outcome
    }

    /// Best-effort close frame upstream. Errors are swallowed: the outcome is
    /// already decided and the connection is dropped right after.
    async fn close_upstream(&mut self, outcome: &RelayOutcome) {
        if matches!(
            outcome,
            RelayOutcome::UpstreamEnded | RelayOutcome::UpstreamLost(RelayError::UpstreamRead(_))
        ) {
            return;
        }
        match tokio::time::timeout(self.close_timeout, self.upstream.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!("Upstream close: {e}"),
            Err(_) => debug!("Upstream close timed out after {:?}", self.close_timeout),
        }
    }
}

/// Forward pump: upstream → client, with keep-alive pings.
async fn forward<U, Tx>(upstream: &mut U, client_tx: &mut Tx, keep_alive: KeepAlive) -> RelayOutcome
where
    U: Stream<Item = Result<UpstreamMessage, tungstenite::Error>>
        + Sink<UpstreamMessage, Error = tungstenite::Error>
        + Unpin,
    Tx: Sink<ClientMessage, Error = axum::Error> + Unpin,
{
    let pings_enabled = !keep_alive.ping_interval.is_zero();
    let period = keep_alive.ping_interval.max(Duration::from_millis(1));
    let mut ping_timer = tokio::time::interval_at(Instant::now() + period, period);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Set while a ping is outstanding.
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            msg = upstream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return RelayOutcome::UpstreamLost(RelayError::UpstreamRead(e)),
                    None => return RelayOutcome::UpstreamEnded,
                };
                let forwarded = match msg {
                    UpstreamMessage::Text(text) => ClientMessage::Text(text.as_str().into()),
                    UpstreamMessage::Binary(data) => ClientMessage::Binary(data),
                    UpstreamMessage::Close(frame) => return RelayOutcome::UpstreamClosed(frame),
                    UpstreamMessage::Pong(_) => {
                        pong_deadline = None;
                        continue;
                    }
                    // Pings are answered by tungstenite itself.
                    UpstreamMessage::Ping(_) | UpstreamMessage::Frame(_) => continue,
                };
                if let Err(e) = client_tx.send(forwarded).await {
                    return RelayOutcome::DownstreamLost(RelayError::DownstreamWrite(e));
                }
            }
            _ = ping_timer.tick(), if pings_enabled => {
                if pong_deadline.is_some() {
                    continue;
                }
                if let Err(e) = upstream.send(UpstreamMessage::Ping(Default::default())).await {
                    return RelayOutcome::UpstreamLost(RelayError::UpstreamWrite(e));
                }
                pong_deadline = Some(Instant::now() + keep_alive.pong_timeout);
            }
            () = tokio::time::sleep_until(pong_deadline.unwrap_or_else(Instant::now)),
                if pong_deadline.is_some() =>
            {
                return RelayOutcome::UpstreamLost(RelayError::KeepAliveTimeout(keep_alive.pong_timeout));
            }
        }
    }
}

/// Disconnect watcher: resolves once the client is gone.
///
/// The client side is receive-only, so anything it sends besides a close
/// frame is read and dropped.
async fn wait_for_disconnect<Rx>(client_rx: &mut Rx)
where
    Rx: Stream<Item = Result<ClientMessage, axum::Error>> + Unpin,
{
    while let Some(msg) = client_rx.next().await {
        match msg {
            Ok(ClientMessage::Close(frame)) => {
                debug!(code = ?frame.as_ref().map(|f| f.code), "Client sent close");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Client connection error: {e}");
                return;
            }
        }
    }
    debug!("Client stream ended");
}
