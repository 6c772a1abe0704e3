#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end handshake tests driven over a real WebSocket client against a
//! real bound server, exercising [`intermud_gateway::ws::handle_connection`]
//! itself rather than calling its internals directly (spec §8 scenarios
//! S1/S2).

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use intermud_common::config::GatewayConfig;
use intermud_gateway::GatewayState;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

async fn start_test_server() -> (SocketAddr, Arc<GatewayState>) {
    let mut config = GatewayConfig::default();
    config.database_path = std::env::temp_dir().join(format!("intermud-gateway-test-{}.db", uuid::Uuid::new_v4()));

    let (router, state) = intermud_gateway::server::build(config).await.expect("build server");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .expect("serve");
    });
    (addr, state)
}

fn auth_frame(mud_name: &str) -> String {
    serde_json::json!({
        "version": "1.0",
        "id": uuid::Uuid::new_v4(),
        "timestamp": chrono::Utc::now(),
        "type": "auth",
        "from": { "mud": mud_name },
        "to": { "mud": "Gateway" },
        "payload": { "mudName": mud_name },
        "metadata": { "priority": 5, "ttl": 60, "encoding": "utf-8", "language": "en" },
    })
    .to_string()
}

fn ping_frame() -> String {
    serde_json::json!({
        "version": "1.0",
        "id": uuid::Uuid::new_v4(),
        "timestamp": chrono::Utc::now(),
        "type": "ping",
        "from": { "mud": "TestMud" },
        "to": { "mud": "Gateway" },
        "payload": { "timestamp": 1_700_000_000 },
        "metadata": { "priority": 5, "ttl": 60, "encoding": "utf-8", "language": "en" },
    })
    .to_string()
}

#[tokio::test]
async fn rejects_name_containing_a_space_with_auth_failed() {
    let (addr, _state) = start_test_server().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.expect("ws connect failed");

    ws.send(Message::Text(auth_frame("Bad Name").into())).await.unwrap();

    let msg = ws.next().await.unwrap().unwrap();
    let reply: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["code"], 1001);
    assert!(reply["payload"]["details"]["suggestedName"].is_string());

    ws.close(None).await.ok();
}

#[tokio::test]
async fn auth_ack_reports_success_and_ping_gets_a_pong() {
    let (addr, state) = start_test_server().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.expect("ws connect failed");

    ws.send(Message::Text(auth_frame("TestMud").into())).await.unwrap();

    let msg = ws.next().await.unwrap().unwrap();
    let ack: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(ack["type"], "auth");
    assert!(ack["payload"]["response"].as_str().unwrap().contains("successful"));
    assert!(state.connection_by_mud("TestMud").await.is_some());

    ws.send(Message::Text(ping_frame().into())).await.unwrap();
    let msg = ws.next().await.unwrap().unwrap();
    let pong: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["payload"]["timestamp"], 1_700_000_000);

    ws.close(None).await.ok();
}

#[tokio::test]
async fn websocket_protocol_pong_refreshes_last_seen() {
    let (addr, state) = start_test_server().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.expect("ws connect failed");

    ws.send(Message::Text(auth_frame("PongMud").into())).await.unwrap();
    ws.next().await.unwrap().unwrap();

    let conn = state.connection_by_mud("PongMud").await.expect("connected");
    let before = conn.last_seen_at();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    ws.send(Message::Pong(Vec::new().into())).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert!(conn.last_seen_at() > before);

    ws.close(None).await.ok();
}
