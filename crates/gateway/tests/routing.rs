#![allow(clippy::unwrap_used, clippy::expect_used)]
//! In-process routing tests against [`GatewayState`] directly, bypassing
//! the real WebSocket transport: each "connection" is an mpsc channel pair
//! plumbed through [`ConnectionRecord`], matching how [`intermud_gateway::ws`]
//! wires a real socket.

use std::sync::Arc;

use intermud_auth::AllowAllCredentialStore;
use intermud_channels::ChannelService;
use intermud_common::config::GatewayConfig;
use intermud_gateway::state::{AdmitOutcome, ConnectionRecord, GatewayState};
use intermud_gateway::{gateway_ops, router};
use intermud_protocol::{
    AuthPayload, ChannelAction, ChannelPayload, Endpoint, Envelope, MessageKind, Metadata, Payload,
    TellPayload,
};
use intermud_ratelimit::RateLimiter;
use intermud_registry::SqliteRegistry;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use uuid::Uuid;

async fn test_state() -> Arc<GatewayState> {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let registry = Arc::new(SqliteRegistry::new(pool).await.unwrap());
    let channels = Arc::new(ChannelService::new(registry.clone()));
    GatewayState::new(
        channels,
        registry,
        Arc::new(AllowAllCredentialStore),
        RateLimiter::default(),
        GatewayConfig::default(),
    )
}

/// Register a fake authenticated connection, returning its record and a
/// receiver that observes every frame sent to it.
async fn connect(state: &Arc<GatewayState>, mud_name: &str) -> (Arc<ConnectionRecord>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let record = Arc::new(ConnectionRecord::new(Uuid::new_v4().to_string(), "127.0.0.1".to_string(), tx));
    state.register_connection(Arc::clone(&record)).await;
    assert_eq!(
        state.admit_peer(mud_name, &record.id).await,
        AdmitOutcome::Admitted
    );
    record.authenticate(mud_name.to_string(), "1.0".to_string());
    (record, rx)
}

fn tell(from: &str, to: &str, message: &str) -> Envelope {
    Envelope {
        version: "1.0".to_string(),
        id: Uuid::new_v4(),
        timestamp: chrono::Utc::now(),
        kind: MessageKind::Tell,
        from: Endpoint::for_mud(from),
        to: Endpoint::for_mud(to),
        payload: Payload::Tell(TellPayload { message: message.to_string() }),
        metadata: Metadata { priority: 5, ttl: 60, encoding: "utf-8".to_string(), language: "en".to_string() },
    }
}

#[tokio::test]
async fn unicast_forward_delivers_to_named_peer() {
    let state = test_state().await;
    let (_a, _rx_a) = connect(&state, "MudA").await;
    let (_b, mut rx_b) = connect(&state, "MudB").await;

    router::route(&state, tell("MudA", "MudB", "hi"), "MudA").await;

    let frame = rx_b.try_recv().expect("MudB should have received a frame");
    assert!(frame.contains("\"message\":\"hi\""));
}

#[tokio::test]
async fn unicast_to_unknown_mud_replies_with_mud_not_found() {
    let state = test_state().await;
    let (_a, mut rx_a) = connect(&state, "MudA").await;

    router::route(&state, tell("MudA", "MudC", "hi"), "MudA").await;

    let frame = rx_a.try_recv().expect("sender should get an error reply");
    assert!(frame.contains("\"type\":\"error\""));
    assert!(frame.contains("1003"));
}

#[tokio::test]
async fn from_field_is_always_overwritten_with_authenticated_name() {
    let state = test_state().await;
    let (_a, _rx_a) = connect(&state, "MudA").await;
    let (_b, mut rx_b) = connect(&state, "MudB").await;

    // MudA claims to be MudZ in the envelope; the router must not believe it.
    router::route(&state, tell("MudZ", "MudB", "spoofed"), "MudA").await;

    let frame = rx_b.try_recv().unwrap();
    assert!(frame.contains("\"mud\":\"MudA\""));
    assert!(!frame.contains("\"mud\":\"MudZ\""));
}

#[tokio::test]
async fn broadcast_reaches_every_peer_except_sender() {
    let state = test_state().await;
    let (_a, mut rx_a) = connect(&state, "MudA").await;
    let (_b, mut rx_b) = connect(&state, "MudB").await;
    let (_c, mut rx_c) = connect(&state, "MudC").await;

    router::route(&state, tell("MudA", "*", "hello all"), "MudA").await;

    assert!(rx_a.try_recv().is_err(), "sender must not receive its own broadcast");
    assert!(rx_b.try_recv().is_ok());
    assert!(rx_c.try_recv().is_ok());
}

#[tokio::test]
async fn disconnect_removes_peer_from_lookup() {
    let state = test_state().await;
    let (a, _rx_a) = connect(&state, "MudA").await;
    connect(&state, "MudB").await;

    state.remove_connection(&a.id).await;
    assert!(state.connection_by_mud("MudA").await.is_none());
    assert_eq!(state.peer_count().await, 1);
}

#[tokio::test]
async fn mudlist_query_lists_connected_peers() {
    let state = test_state().await;
    let (_a, mut rx_a) = connect(&state, "MudA").await;
    connect(&state, "MudB").await;

    let envelope = Envelope::gateway_reply(
        Endpoint::for_mud("Gateway"),
        MessageKind::Mudlist,
        Payload::Request(intermud_protocol::RequestPayload { request: true }),
        5,
    );
    let mut envelope = envelope;
    envelope.from = Endpoint::for_mud("MudA");
    envelope.to = Endpoint::for_mud("Gateway");

    gateway_ops::handle(&state, envelope).await;

    let frame = rx_a.try_recv().unwrap();
    assert!(frame.contains("\"MudA\""));
    assert!(frame.contains("\"MudB\""));
}

#[tokio::test]
async fn duplicate_name_policy_allow_admits_both_by_default() {
    let state = test_state().await;
    let (_first, _rx_first) = connect(&state, "MudA").await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let second = Arc::new(ConnectionRecord::new(Uuid::new_v4().to_string(), "127.0.0.1".to_string(), tx));
    state.register_connection(Arc::clone(&second)).await;
    let outcome = state.admit_peer("MudA", &second.id).await;
    assert!(matches!(outcome, AdmitOutcome::AdmittedOverCollision { .. }));
}

#[tokio::test]
async fn gateway_addressed_channel_join_then_message_fans_out_to_members() {
    let state = test_state().await;
    let (_a, mut rx_a) = connect(&state, "MudA").await;
    let (_b, mut rx_b) = connect(&state, "MudB").await;

    state
        .channels
        .create("ooc", &Endpoint::for_mud("MudA"), None)
        .await
        .unwrap();

    let join = |mud: &str| {
        let mut e = Envelope::gateway_reply(
            Endpoint::for_mud("Gateway"),
            MessageKind::Channel,
            Payload::Channel(ChannelPayload {
                channel: "ooc".to_string(),
                action: ChannelAction::Join,
                message: None,
            }),
            5,
        );
        e.from = Endpoint::for_mud(mud);
        e.to = Endpoint::for_mud("Gateway");
        e
    };
    gateway_ops::handle(&state, join("MudA")).await;
    gateway_ops::handle(&state, join("MudB")).await;
    let _ = rx_a.try_recv();
    let _ = rx_b.try_recv();

    let mut msg = Envelope::gateway_reply(
        Endpoint::for_mud("Gateway"),
        MessageKind::Channel,
        Payload::Channel(ChannelPayload {
            channel: "ooc".to_string(),
            action: ChannelAction::Message,
            message: Some("hi all".to_string()),
        }),
        5,
    );
    msg.from = Endpoint::for_mud("MudA");
    msg.to = Endpoint::for_mud("Gateway");
    gateway_ops::handle(&state, msg).await;

    let frame_b = rx_b.try_recv().expect("MudB is a member and should receive the post");
    assert!(frame_b.contains("hi all"));
}
