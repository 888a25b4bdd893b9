//! Access control: trusted-network allowlist plus a pre-shared bearer token.
//!
//! Peers on loopback, private (RFC 1918 / RFC 4193) or link-local addresses
//! are let in without credentials so the console works from the robot's own
//! hotspot or LAN. Everyone else must send `Authorization: Bearer <token>`.
//!
//! The REST routes go through [`require_auth`]; the log-tail WebSocket calls
//! [`authorize`] directly so it can answer with a close code instead of an
//! HTTP status.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::debug;

use crate::token::ApiToken;
use crate::AppState;

const BEARER_PREFIX: &str = "Bearer ";

/// Why a request was turned away. The messages are deliberately generic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// No `Authorization` header, or one without the `Bearer ` prefix.
    MissingBearer,
    /// Bearer token present but wrong.
    InvalidToken,
}

impl AuthRejection {
    pub fn message(self) -> &'static str {
        match self {
            Self::MissingBearer => "missing bearer token",
            Self::InvalidToken => "invalid token",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            Self::MissingBearer => StatusCode::UNAUTHORIZED,
            Self::InvalidToken => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({"error": self.message()}))).into_response()
    }
}

/// Whether `host` is a local or private address that needs no token.
///
/// Total: anything that isn't a recognisable loopback, private or link-local
/// address (including garbage) is untrusted.
pub fn is_trusted_host(host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    if matches!(host, "127.0.0.1" | "::1" | "localhost") {
        return true;
    }
    let literal = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    literal.parse::<IpAddr>().is_ok_and(is_trusted_ip)
}

fn is_trusted_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_trusted_ip(IpAddr::V4(v4)),
            None => v6.is_loopback() || is_unique_local(v6) || is_unicast_link_local(v6),
        },
    }
}

/// fc00::/7
fn is_unique_local(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

/// fe80::/10
fn is_unicast_link_local(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Validate an `Authorization` header value against the shared token.
///
/// The value must be exactly `"Bearer " + token`; no trimming, no
/// case-folding of the scheme.
pub fn check_bearer(header: Option<&str>, token: &ApiToken) -> Result<(), AuthRejection> {
    let provided = header
        .and_then(|h| h.strip_prefix(BEARER_PREFIX))
        .ok_or(AuthRejection::MissingBearer)?;

    if constant_time_eq(token.expose().as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(AuthRejection::InvalidToken)
    }
}

/// How a peer got in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    TrustedNetwork,
    BearerToken,
}

impl Admission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrustedNetwork => "trusted_network",
            Self::BearerToken => "bearer_token",
        }
    }
}

/// Full gate: trusted peers pass, everyone else needs the bearer token.
///
/// `trust_local_networks = false` skips the allowlist so every peer must
/// present the token.
pub fn authorize(
    peer: &str,
    header: Option<&str>,
    token: &ApiToken,
    trust_local_networks: bool,
) -> Result<Admission, AuthRejection> {
    if trust_local_networks && is_trusted_host(peer) {
        return Ok(Admission::TrustedNetwork);
    }
    check_bearer(header, token).map(|()| Admission::BearerToken)
}

/// Axum middleware guarding the REST routes.
///
/// # Error responses
///
/// - `401 Unauthorized`: header missing or not a bearer credential
/// - `403 Forbidden`: bearer token present but invalid
pub async fn require_auth(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if let Err(rejection) = authorize(
        &peer.ip().to_string(),
        header,
        &state.token,
        state.config.auth.trust_local_networks,
    ) {
        debug!(%peer, path = %request.uri().path(), "Rejected: {}", rejection.message());
        return rejection.into_response();
    }

    next.run(request).await
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
///
/// Always iterates over the full length of `expected` regardless of `provided`
/// length, so an attacker cannot determine the key length from response times.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for (i, e) in expected.iter().enumerate() {
        let p = provided.get(i).copied().unwrap_or(0xff);
        diff |= e ^ p;
    }
    diff == 0
}
