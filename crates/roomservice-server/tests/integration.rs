//! End-to-end tests against a real server bound to an ephemeral port.

#![allow(missing_docs)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use roomservice_core::{Envelope, OrderStatus};
use roomservice_server::config::ServerConfig;
use roomservice_server::orders::InMemoryOrders;
use roomservice_server::server::RoomserviceServer;
use roomservice_server::websocket::socket::WELCOME_MESSAGE;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(heartbeat_interval_ms: u64) -> (RoomserviceServer, SocketAddr) {
    let config = ServerConfig {
        welcome_delay_ms: 10,
        heartbeat_interval_ms,
        ..ServerConfig::default()
    };
    let server = RoomserviceServer::new(config, Arc::new(InMemoryOrders::new()));
    let (addr, _handle) = server.listen().await.unwrap();
    (server, addr)
}

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

/// Next envelope, skipping control frames.
async fn next_envelope(ws: &mut Ws) -> Envelope {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return Envelope::decode(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Connect and consume the greeting, so the session is registered.
async fn connect_ready(addr: SocketAddr) -> Ws {
    let mut ws = connect(addr).await;
    assert_eq!(next_envelope(&mut ws).await, Envelope::connection(WELCOME_MESSAGE));
    ws
}

async fn assert_silent(ws: &mut Ws) {
    let res = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(res.is_err(), "expected no frame, got {res:?}");
}

fn valid_order(room: &str) -> serde_json::Value {
    json!({
        "roomNumber": room,
        "name": "A. Guest",
        "items": [
            {"name": "Burger", "quantity": 1, "price": 14.0},
            {"name": "Fries", "quantity": 2, "price": 3.5}
        ]
    })
}

#[tokio::test]
async fn new_session_gets_exactly_one_greeting() {
    let (_server, addr) = start_server(30_000).await;
    let mut ws = connect_ready(addr).await;
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn text_frames_are_echoed() {
    let (_server, addr) = start_server(30_000).await;
    let mut ws = connect_ready(addr).await;

    ws.send(Message::text(r#"{"ping":1}"#)).await.unwrap();
    assert_eq!(next_envelope(&mut ws).await, Envelope::echo(json!({"ping": 1})));

    ws.send(Message::text("hello")).await.unwrap();
    assert_eq!(next_envelope(&mut ws).await, Envelope::echo(json!("hello")));
}

#[tokio::test]
async fn created_order_reaches_every_session_once() {
    let (server, addr) = start_server(30_000).await;
    let mut a = connect_ready(addr).await;
    let mut b = connect_ready(addr).await;
    assert_eq!(server.registry().connection_count().await, 2);

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/orders"))
        .json(&valid_order("204"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: serde_json::Value = resp.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    for ws in [&mut a, &mut b] {
        let env = next_envelope(ws).await;
        assert_matches!(&env, Envelope::NewOrder { order } if order.id.as_str() == id);
        assert_silent(ws).await;
    }
}

#[tokio::test]
async fn invalid_order_emits_nothing() {
    let (_server, addr) = start_server(30_000).await;
    let mut ws = connect_ready(addr).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/orders"))
        .json(&json!({"roomNumber": "204", "items": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn status_update_is_broadcast() {
    let (_server, addr) = start_server(30_000).await;
    let http = reqwest::Client::new();
    let created: serde_json::Value = http
        .post(format!("http://{addr}/api/orders"))
        .json(&valid_order("101"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    let mut ws = connect_ready(addr).await;
    let resp = http
        .patch(format!("http://{addr}/api/orders/{id}/status"))
        .json(&json!({"status": "Preparing"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let env = next_envelope(&mut ws).await;
    let order = env.order().unwrap();
    assert_eq!(order.id.as_str(), id);
    assert_eq!(order.status, OrderStatus::Preparing);
    assert_matches!(env, Envelope::OrderStatusUpdate { .. });

    // unknown id: 404 and no envelope
    let resp = http
        .patch(format!("http://{addr}/api/orders/ord_missing/status"))
        .json(&json!({"status": "Delivered"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn closed_session_is_unregistered() {
    let (server, addr) = start_server(30_000).await;
    let mut ws = connect_ready(addr).await;
    assert_eq!(server.registry().connection_count().await, 1);

    ws.close(None).await.unwrap();
    drop(ws);

    for _ in 0..50 {
        if server.registry().connection_count().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session still registered after close");
}

#[tokio::test]
async fn unresponsive_session_is_evicted() {
    let (server, addr) = start_server(100).await;
    // Never polled after the greeting, so pings go unanswered.
    let _silent = connect_ready(addr).await;
    assert_eq!(server.registry().connection_count().await, 1);

    for _ in 0..50 {
        if server.registry().connection_count().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("silent session was not evicted");
}

#[tokio::test]
async fn health_reports_connections() {
    let (_server, addr) = start_server(30_000).await;
    let _ws = connect_ready(addr).await;
    let health: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
}
