//! End-to-end tests against a real listener and WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_core::assign_color;
use parley_server::{ChatServer, ServerConfig};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Boot a server on an ephemeral port.
async fn boot_server(config: ServerConfig) -> (SocketAddr, Arc<ChatServer>) {
    let server = Arc::new(ChatServer::new(config));
    let (addr, _handle) = server.listen().await.unwrap();
    (addr, server)
}

async fn boot_default() -> (SocketAddr, Arc<ChatServer>) {
    boot_server(ServerConfig::default()).await
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{addr}/api/chat-ws")).await.unwrap();
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames.
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("transport error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Read until the server's close frame, skipping anything before it.
async fn next_close(ws: &mut WsStream) -> Option<CloseFrame> {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.expect("timed out waiting for close");
        match msg {
            Some(Ok(Message::Close(frame))) => return frame,
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return None,
        }
    }
}

/// Connect and identify, consuming the client's own join notice.
async fn join(addr: SocketAddr, username: &str) -> WsStream {
    let mut ws = connect(addr).await;
    send_json(&mut ws, json!({"type": "identify", "username": username})).await;
    let own = next_json(&mut ws).await;
    assert_eq!(own["message_type"], "room");
    assert_eq!(own["action"], "join");
    assert_eq!(own["user"], username);
    ws
}

async fn check_name(addr: SocketAddr, username: &str) -> bool {
    let body: Value = reqwest::get(format!("http://{addr}/api/check-name?username={username}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["available"].as_bool().unwrap()
}

#[tokio::test]
async fn join_chat_and_leave_round() {
    let (addr, _server) = boot_default().await;

    let mut alice = connect(addr).await;
    send_json(&mut alice, json!({"type": "identify", "username": "alice"})).await;
    let join_alice = next_json(&mut alice).await;
    assert_eq!(join_alice["type"], "message");
    assert_eq!(join_alice["message_type"], "room");
    assert_eq!(join_alice["user"], "alice");
    assert_eq!(join_alice["action"], "join");
    assert!(join_alice["id"].is_string());

    let mut bob = join(addr, "bob").await;
    let join_bob = next_json(&mut alice).await;
    assert_eq!(join_bob["message_type"], "room");
    assert_eq!(join_bob["user"], "bob");
    assert_eq!(join_bob["action"], "join");

    send_json(&mut bob, json!({"type": "send", "message": "hi"})).await;
    for ws in [&mut alice, &mut bob] {
        let msg = next_json(ws).await;
        assert_eq!(msg["type"], "message");
        assert_eq!(msg["message_type"], "message");
        assert_eq!(msg["user"], "bob");
        assert_eq!(msg["usercolor"], assign_color("bob"));
        assert_eq!(msg["message"], "hi");
        assert!(msg["time"].as_str().unwrap().ends_with('Z'));
    }

    alice.close(None).await.unwrap();
    let leave = next_json(&mut bob).await;
    assert_eq!(leave["message_type"], "room");
    assert_eq!(leave["user"], "alice");
    assert_eq!(leave["action"], "leave");
}

#[tokio::test]
async fn check_name_follows_registrations() {
    let (addr, _server) = boot_default().await;

    assert!(check_name(addr, "alice").await);
    let mut alice = join(addr, "alice").await;
    assert!(!check_name(addr, "alice").await);
    assert!(check_name(addr, "bob").await);

    alice.close(None).await.unwrap();
    let freed = timeout(TIMEOUT, async {
        while !check_name(addr, "alice").await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(freed.is_ok(), "alice was never unregistered");
}

#[tokio::test]
async fn wrong_first_message_closes_with_4001() {
    let (addr, server) = boot_default().await;
    let mut watcher = join(addr, "watcher").await;

    let mut ws = connect(addr).await;
    send_json(&mut ws, json!({"type": "send", "message": "hi"})).await;
    let frame = next_close(&mut ws).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 4001);
    assert_eq!(frame.reason.as_str(), "Required identification packet not provided");

    // The failed session was never visible to the room.
    send_json(&mut watcher, json!({"type": "send", "message": "still here"})).await;
    let next = next_json(&mut watcher).await;
    assert_eq!(next["message"], "still here");
    assert_eq!(server.registry().usernames(), vec!["watcher"]);
}

#[tokio::test]
async fn empty_username_closes_with_4001() {
    let (addr, _server) = boot_default().await;
    let mut ws = connect(addr).await;
    send_json(&mut ws, json!({"type": "identify", "username": ""})).await;
    let frame = next_close(&mut ws).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 4001);
}

#[tokio::test]
async fn non_utf8_first_frame_closes_with_4001() {
    let (addr, server) = boot_default().await;
    let mut ws = connect(addr).await;
    ws.send(Message::Binary(vec![0xff, 0xfe].into())).await.unwrap();
    let frame = next_close(&mut ws).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 4001);
    assert!(server.registry().is_empty());
}

#[tokio::test]
async fn silent_client_times_out_with_4001() {
    let (addr, _server) = boot_server(ServerConfig {
        identify_timeout_secs: 1,
        ..ServerConfig::default()
    })
    .await;
    let mut ws = connect(addr).await;
    let frame = next_close(&mut ws).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 4001);
}

#[tokio::test]
async fn unsupported_kind_closes_session_and_announces_leave() {
    let (addr, server) = boot_default().await;
    let mut alice = join(addr, "alice").await;
    let mut bob = join(addr, "bob").await;
    let _ = next_json(&mut alice).await; // bob's join

    send_json(&mut bob, json!({"type": "typing"})).await;
    let frame = next_close(&mut bob).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 1003);

    let leave = next_json(&mut alice).await;
    assert_eq!(leave["user"], "bob");
    assert_eq!(leave["action"], "leave");
    assert_eq!(server.registry().usernames(), vec!["alice"]);

    // Alice's session is unaffected.
    send_json(&mut alice, json!({"type": "send", "message": "anyone?"})).await;
    assert_eq!(next_json(&mut alice).await["message"], "anyone?");
}

#[tokio::test]
async fn binary_text_frames_are_accepted() {
    let (addr, _server) = boot_default().await;
    let mut ws = connect(addr).await;
    let identify = json!({"type": "identify", "username": "carol"}).to_string();
    ws.send(Message::Binary(identify.into_bytes().into())).await.unwrap();
    let own = next_json(&mut ws).await;
    assert_eq!(own["user"], "carol");
    assert_eq!(own["action"], "join");
}

#[tokio::test]
async fn same_name_replaces_older_connection() {
    let (addr, server) = boot_default().await;
    let mut first = join(addr, "alice").await;
    let _second = join(addr, "alice").await;

    // The older session is closed once its name is taken over.
    let frame = next_close(&mut first).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 1008);
    assert_eq!(server.registry().len(), 1);
}

#[tokio::test]
async fn full_server_refuses_upgrade() {
    let (addr, _server) = boot_server(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    })
    .await;
    let _alice = join(addr, "alice").await;

    let err = connect_async(format!("ws://{addr}/api/chat-ws")).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => {
            assert_eq!(resp.status().as_u16(), 503);
        }
        other => panic!("expected HTTP error, got {other:?}"),
    }
}

#[tokio::test]
async fn health_counts_identified_users() {
    let (addr, _server) = boot_default().await;
    let _alice = join(addr, "alice").await;
    let _bob = join(addr, "bob").await;

    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);
}

#[tokio::test]
async fn shutdown_sends_going_away() {
    let (addr, server) = boot_default().await;
    let mut alice = join(addr, "alice").await;

    server.shutdown().shutdown();
    let frame = next_close(&mut alice).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 1001);
}

#[tokio::test]
async fn graceful_shutdown_drains_sessions() {
    let server = Arc::new(ChatServer::new(ServerConfig::default()));
    let (addr, handle) = server.listen().await.unwrap();
    let mut alice = join(addr, "alice").await;
    assert_eq!(server.shutdown().sessions().len(), 1);

    let clean = server
        .shutdown()
        .graceful_shutdown(handle, Duration::from_secs(5))
        .await;
    assert!(clean);
    assert!(server.shutdown().sessions().is_empty());
    let frame = next_close(&mut alice).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 1001);
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let (addr, _server) = boot_default().await;
    let mut alice = join(addr, "alice").await;
    let mut bob = join(addr, "bob").await;
    let _ = next_json(&mut alice).await; // bob's join

    for i in 0..20 {
        send_json(&mut bob, json!({"type": "send", "message": format!("m{i}")})).await;
    }
    for i in 0..20 {
        assert_eq!(next_json(&mut alice).await["message"], format!("m{i}"));
    }
}
