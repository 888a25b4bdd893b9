//! End-to-end tests for `GET /logs/tail` against a fake upstream.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::connect_info::MockConnectInfo;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use robot_api::{ApiToken, AppState, Config};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Upstream = WebSocketStream<TcpStream>;

const TOKEN: &str = "test-token";
const SELECTOR: &str = "%7Bjob%3D%22robot%22%7D";

fn config(upstream_url: &str) -> Config {
    let mut config = Config::default();
    config.logs.upstream_url = upstream_url.to_string();
    config.logs.close_timeout_secs = 1;
    config
}

fn state(upstream_url: &str) -> AppState {
    AppState::new(config(upstream_url), ApiToken::new(TOKEN))
}

/// Serve the app with real peer addresses (loopback, so trusted).
async fn spawn_app(upstream_url: &str) -> SocketAddr {
    spawn_app_with(config(upstream_url)).await
}

async fn spawn_app_with(config: Config) -> SocketAddr {
    let app = robot_api::app(AppState::new(config, ApiToken::new(TOKEN)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Serve the app as if every peer came from a public address.
async fn spawn_app_public(upstream_url: &str) -> SocketAddr {
    let peer = SocketAddr::from(([203, 0, 113, 7], 40000));
    let app = robot_api::app(state(upstream_url)).layer(MockConnectInfo(peer));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    addr
}

/// Fake Loki tail endpoint serving a single connection with `script`.
/// Resolves the returned receiver with the request URI it saw.
async fn spawn_upstream<F, Fut>(script: F) -> (String, oneshot::Receiver<String>)
where
    F: FnOnce(Upstream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (uri_tx, uri_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let seen = Arc::new(Mutex::new(String::new()));
        let seen_cb = Arc::clone(&seen);
        let ws = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| {
            *seen_cb.lock().unwrap() = req.uri().to_string();
            Ok::<_, ErrorResponse>(resp)
        })
        .await
        .unwrap();
        let uri = seen.lock().unwrap().clone();
        let _ = uri_tx.send(uri);
        script(ws).await;
    });
    (format!("ws://{addr}/loki/api/v1/tail"), uri_rx)
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let url = format!("ws://{addr}/logs/tail{query}");
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn next_msg(ws: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for message")
        .expect("stream ended")
        .expect("websocket error")
}

fn close_code(msg: &Message) -> CloseCode {
    match msg {
        Message::Close(Some(frame)) => frame.code,
        other => panic!("expected close frame, got {other:?}"),
    }
}

fn error_message(msg: &Message) -> String {
    let Message::Text(text) = msg else {
        panic!("expected text frame, got {msg:?}");
    };
    let v: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(v["type"], "error");
    v["message"].as_str().unwrap().to_string()
}

/// Address nothing listens on.
async fn dead_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/loki/api/v1/tail")
}

#[tokio::test]
async fn test_missing_selector_closes_with_protocol_error() {
    let addr = spawn_app(&dead_upstream().await).await;
    let mut ws = connect(addr, "?limit=10").await;

    let msg = next_msg(&mut ws).await;
    assert_eq!(close_code(&msg), CloseCode::Protocol);
}

#[tokio::test]
async fn test_blank_selector_counts_as_missing() {
    let addr = spawn_app(&dead_upstream().await).await;
    let mut ws = connect(addr, "?query=&selector=%20").await;

    let msg = next_msg(&mut ws).await;
    assert_eq!(close_code(&msg), CloseCode::Protocol);
}

#[tokio::test]
async fn test_public_peer_without_token_closes_with_policy() {
    let addr = spawn_app_public(&dead_upstream().await).await;
    let mut ws = connect(addr, &format!("?query={SELECTOR}")).await;

    let msg = next_msg(&mut ws).await;
    assert_eq!(close_code(&msg), CloseCode::Policy);
}

#[tokio::test]
async fn test_public_peer_with_wrong_token_closes_with_policy() {
    let addr = spawn_app_public(&dead_upstream().await).await;
    let mut req = format!("ws://{addr}/logs/tail?query={SELECTOR}")
        .into_client_request()
        .unwrap();
    req.headers_mut()
        .insert("Authorization", "Bearer wrong".parse().unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(req).await.unwrap();

    let msg = next_msg(&mut ws).await;
    assert_eq!(close_code(&msg), CloseCode::Policy);
}

#[tokio::test]
async fn test_public_peer_with_token_is_relayed() {
    let (upstream_url, _uri) = spawn_upstream(|mut up| async move {
        up.send(Message::text("hello")).await.unwrap();
        up.close(None).await.unwrap();
        while up.next().await.is_some() {}
    })
    .await;
    let addr = spawn_app_public(&upstream_url).await;
    let mut req = format!("ws://{addr}/logs/tail?query={SELECTOR}")
        .into_client_request()
        .unwrap();
    req.headers_mut()
        .insert("Authorization", format!("Bearer {TOKEN}").parse().unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(req).await.unwrap();

    assert_eq!(next_msg(&mut ws).await, Message::text("hello"));
    assert_eq!(close_code(&next_msg(&mut ws).await), CloseCode::Normal);
}

#[tokio::test]
async fn test_unreachable_upstream_reports_provider_unavailable() {
    let addr = spawn_app(&dead_upstream().await).await;
    let mut ws = connect(addr, &format!("?query={SELECTOR}")).await;

    let msg = next_msg(&mut ws).await;
    assert_eq!(error_message(&msg), "log provider unavailable");
    assert_eq!(close_code(&next_msg(&mut ws).await), CloseCode::Error);
}

#[tokio::test]
async fn test_frames_relayed_in_order_then_normal_close() {
    let (upstream_url, uri) = spawn_upstream(|mut up| async move {
        for line in ["line 1", "line 2", "line 3"] {
            up.send(Message::text(line)).await.unwrap();
        }
        up.close(None).await.unwrap();
        while up.next().await.is_some() {}
    })
    .await;
    let addr = spawn_app(&upstream_url).await;
    let mut ws = connect(addr, &format!("?query={SELECTOR}&limit=50")).await;

    for line in ["line 1", "line 2", "line 3"] {
        assert_eq!(next_msg(&mut ws).await, Message::text(line));
    }
    assert_eq!(close_code(&next_msg(&mut ws).await), CloseCode::Normal);

    let uri = uri.await.unwrap();
    assert_eq!(uri, format!("/loki/api/v1/tail?query={SELECTOR}&limit=50"));
}

#[tokio::test]
async fn test_selector_alias_accepted() {
    let (upstream_url, uri) = spawn_upstream(|mut up| async move {
        up.close(None).await.unwrap();
        while up.next().await.is_some() {}
    })
    .await;
    let addr = spawn_app(&upstream_url).await;
    let mut ws = connect(addr, &format!("?selector={SELECTOR}")).await;

    assert_eq!(close_code(&next_msg(&mut ws).await), CloseCode::Normal);
    assert_eq!(
        uri.await.unwrap(),
        format!("/loki/api/v1/tail?query={SELECTOR}")
    );
}

#[tokio::test]
async fn test_binary_frames_stay_binary() {
    let payload = vec![0u8, 1, 2, 0xff];
    let sent = payload.clone();
    let (upstream_url, _uri) = spawn_upstream(|mut up| async move {
        up.send(Message::binary(sent)).await.unwrap();
        up.close(None).await.unwrap();
        while up.next().await.is_some() {}
    })
    .await;
    let addr = spawn_app(&upstream_url).await;
    let mut ws = connect(addr, &format!("?query={SELECTOR}")).await;

    assert_eq!(next_msg(&mut ws).await, Message::binary(payload));
    assert_eq!(close_code(&next_msg(&mut ws).await), CloseCode::Normal);
}

#[tokio::test]
async fn test_upstream_reset_ends_with_normal_close() {
    let (upstream_url, _uri) = spawn_upstream(|mut up| async move {
        up.send(Message::text("partial")).await.unwrap();
        // Drop the TCP connection without a closing handshake.
        drop(up);
    })
    .await;
    let addr = spawn_app(&upstream_url).await;
    let mut ws = connect(addr, &format!("?query={SELECTOR}")).await;

    assert_eq!(next_msg(&mut ws).await, Message::text("partial"));
    // No error payload, straight to a normal close.
    assert_eq!(close_code(&next_msg(&mut ws).await), CloseCode::Normal);
}

#[tokio::test]
async fn test_silent_upstream_ends_after_missed_pong() {
    // Never reading means tungstenite never answers our pings.
    let (upstream_url, _uri) = spawn_upstream(|up| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(up);
    })
    .await;
    let mut settings = config(&upstream_url);
    settings.logs.ping_interval_secs = 1;
    settings.logs.pong_timeout_secs = 1;
    let addr = spawn_app_with(settings).await;

    let started = Instant::now();
    let mut ws = connect(addr, &format!("?query={SELECTOR}")).await;

    assert_eq!(close_code(&next_msg(&mut ws).await), CloseCode::Normal);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1500), "closed too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "closed too late: {elapsed:?}");
}

#[tokio::test]
async fn test_zero_ping_interval_keeps_silent_upstream() {
    let (upstream_url, _uri) = spawn_upstream(|mut up| async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        up.send(Message::text("still here")).await.unwrap();
        up.close(None).await.unwrap();
        while up.next().await.is_some() {}
    })
    .await;
    let mut settings = config(&upstream_url);
    settings.logs.ping_interval_secs = 0;
    settings.logs.pong_timeout_secs = 1;
    let addr = spawn_app_with(settings).await;
    let mut ws = connect(addr, &format!("?query={SELECTOR}")).await;

    assert_eq!(next_msg(&mut ws).await, Message::text("still here"));
    assert_eq!(close_code(&next_msg(&mut ws).await), CloseCode::Normal);
}

#[tokio::test]
async fn test_client_disconnect_closes_upstream() {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();
    let (upstream_url, _uri) = spawn_upstream(|mut up| async move {
        let _ = ready_tx.send(());
        // Idle until the relay hangs up on us.
        while let Some(Ok(msg)) = up.next().await {
            if msg.is_close() {
                break;
            }
        }
        let _ = done_tx.send(());
    })
    .await;
    let addr = spawn_app(&upstream_url).await;
    let mut ws = connect(addr, &format!("?query={SELECTOR}")).await;

    tokio::time::timeout(Duration::from_secs(5), ready_rx)
        .await
        .unwrap()
        .unwrap();
    ws.close(None).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .expect("upstream was not closed after client disconnect")
        .unwrap();
}
