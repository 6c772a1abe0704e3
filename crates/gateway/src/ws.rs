//! Connection Manager (spec §4.2): accept, authenticate, run the message
//! loop, and clean up a single WebSocket connection end to end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use intermud_auth::AuthOutcome;
use intermud_protocol::error_codes::{AUTH_FAILED, INVALID_MESSAGE, MESSAGE_TOO_LARGE, RATE_LIMITED, UNAUTHORIZED};
use intermud_protocol::{codec, AuthPayload, Endpoint, Envelope, MessageKind, Payload, PingPongPayload};
use intermud_ratelimit::{Decision, Scope};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::router;
use crate::state::{AdmitOutcome, ConnectionRecord, GatewayState};

/// Frames accepted before authentication completes are limited to `auth`;
/// anything else gets `Unauthorized` and the connection is dropped (spec
/// §4.2 "auth-frame-first").
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, remote_addr: SocketAddr) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let host = remote_addr.ip().to_string();

    if let Decision::Denied { retry_after } = state.rate_limiter.check(Scope::Connect(host.clone())) {
        debug!(conn_id = %conn_id, host = %host, retry_after_secs = retry_after.as_secs(), "ws: connect rate limited");
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let record = Arc::new(ConnectionRecord::new(conn_id.clone(), host.clone(), tx.clone()));
    state.register_connection(Arc::clone(&record)).await;
    info!(conn_id = %conn_id, host = %host, "ws: connection accepted");

    let grace = Duration::from_secs(state.config.auth_grace_period_sec);
    let authenticated = match tokio::time::timeout(grace, authenticate(&state, &record, &mut ws_rx)).await {
        Ok(Ok(mud_name)) => Some(mud_name),
        Ok(Err(reason)) => {
            warn!(conn_id = %conn_id, reason = %reason, "ws: authentication failed");
            None
        },
        Err(_) => {
            warn!(conn_id = %conn_id, "ws: authentication timed out");
            None
        },
    };

    let Some(mud_name) = authenticated else {
        state.remove_connection(&conn_id).await;
        drop(tx);
        write_handle.abort();
        return;
    };

    message_loop(&state, &record, &mud_name, &mut ws_rx).await;

    state.remove_connection(&conn_id).await;
    info!(conn_id = %conn_id, mud_name = %mud_name, "ws: connection closed");
    drop(tx);
    write_handle.abort();
}

/// Wait for the first frame, require it to be a well-formed `auth` frame,
/// validate the MUD name shape, check credentials, and admit the name
/// under the configured duplicate-name policy (spec §4.2, §4.6, §8 S1/S2).
async fn authenticate(
    state: &Arc<GatewayState>,
    record: &Arc<ConnectionRecord>,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<String, String> {
    let Some(msg) = ws_rx.next().await else {
        return Err("connection closed before auth frame".to_string());
    };
    let text = match msg {
        Ok(Message::Text(t)) => t.to_string(),
        Ok(Message::Close(_)) => return Err("connection closed before auth frame".to_string()),
        Ok(_) => return Err("first frame must be text".to_string()),
        Err(e) => return Err(e.to_string()),
    };

    let envelope = match codec::decode(text.as_bytes(), state.config.max_frame_bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            send_error_and_close(record, INVALID_MESSAGE, &e.to_string());
            return Err(e.to_string());
        },
    };

    let Payload::Auth(AuthPayload { mud_name, token, .. }) = &envelope.payload else {
        send_error_and_close(record, UNAUTHORIZED, "first frame must be type `auth`");
        return Err("first frame was not an auth frame".to_string());
    };

    if let Err(e) = intermud_protocol::validate_name(mud_name) {
        let suggestion = intermud_protocol::suggest_name(mud_name);
        let reply = Envelope::error_reply_with_details(
            Endpoint::for_mud(mud_name.clone()),
            AUTH_FAILED,
            e.to_string(),
            serde_json::json!({ "suggestedName": suggestion }),
        );
        record.send(&reply);
        return Err(e.to_string());
    }

    let secret = token.clone().unwrap_or_default();
    let outcome = if state.config.require_credential {
        state.credentials.authenticate(mud_name, &secret).await
    } else {
        Ok(AuthOutcome::Accepted)
    };

    match outcome {
        Ok(AuthOutcome::Accepted | AuthOutcome::Provisioned) => {},
        Ok(AuthOutcome::Rejected) => {
            send_error_and_close(record, AUTH_FAILED, "credential mismatch");
            return Err("credential mismatch".to_string());
        },
        Err(e) => {
            send_error_and_close(record, AUTH_FAILED, &e.to_string());
            return Err(e.to_string());
        },
    }

    match state.admit_peer(mud_name, &record.id).await {
        AdmitOutcome::Rejected => {
            send_error_and_close(record, AUTH_FAILED, format!("`{mud_name}` is already connected"));
            return Err("duplicate name rejected".to_string());
        },
        AdmitOutcome::AdmittedOverCollision { evicted: Some(evicted_conn_id) } => {
            if let Some(evicted) = state.connections.read().await.get(&evicted_conn_id).cloned() {
                evicted.request_close();
            }
        },
        AdmitOutcome::AdmittedOverCollision { evicted: None } | AdmitOutcome::Admitted => {},
    }

    record.authenticate(mud_name.clone(), envelope.version.clone());

    let ack = Envelope::gateway_reply(
        Endpoint::for_mud(mud_name.clone()),
        MessageKind::Auth,
        Payload::Auth(AuthPayload {
            mud_name: mud_name.clone(),
            token: None,
            response: Some("Authentication successful".to_string()),
        }),
        envelope.metadata.priority,
    );
    record.send(&ack);

    Ok(mud_name.clone())
}

async fn message_loop(
    state: &Arc<GatewayState>,
    record: &Arc<ConnectionRecord>,
    mud_name: &str,
    ws_rx: &mut SplitStream<WebSocket>,
) {
    loop {
        tokio::select! {
            biased;
            _ = record.wait_for_close_request() => {
                break;
            }
            msg = ws_rx.next() => {
                let Some(msg) = msg else { break };
                match msg {
                    Ok(Message::Text(text)) => {
                        record.touch();
                        handle_frame(state, record, mud_name, text.as_str()).await;
                    }
                    Ok(Message::Pong(_)) => {
                        record.touch();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(conn_id = %record.id, error = %e, "ws: read error");
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_frame(state: &Arc<GatewayState>, record: &Arc<ConnectionRecord>, mud_name: &str, text: &str) {
    let envelope = match codec::decode(text.as_bytes(), state.config.max_frame_bytes) {
        Ok(envelope) => envelope,
        Err(codec::DecodeError::TooLarge { size, max }) => {
            let reply = Envelope::error_reply(
                Endpoint::for_mud(mud_name),
                MESSAGE_TOO_LARGE,
                format!("frame of {size} bytes exceeds max {max}"),
            );
            record.send(&reply);
            return;
        },
        Err(e) => {
            let reply = Envelope::error_reply(Endpoint::for_mud(mud_name), INVALID_MESSAGE, e.to_string());
            record.send(&reply);
            return;
        },
    };

    if codec::is_expired(&envelope, chrono::Utc::now()) {
        debug!(conn_id = %record.id, "ws: dropping expired frame");
        return;
    }

    if matches!(envelope.kind, MessageKind::Ping) {
        respond_pong(record, mud_name, &envelope);
        return;
    }
    if matches!(envelope.kind, MessageKind::Pong) {
        return;
    }

    let scope = match envelope.kind {
        MessageKind::Tell => Some(Scope::Tell(mud_name.to_string())),
        MessageKind::Channel => Some(Scope::Channel(mud_name.to_string())),
        MessageKind::Emote | MessageKind::Emoteto | MessageKind::Who | MessageKind::Finger | MessageKind::Locate => {
            Some(Scope::Message(mud_name.to_string()))
        },
        _ => None,
    };
    if let Some(scope) = scope {
        if let Decision::Denied { .. } = state.rate_limiter.check(scope) {
            let reply = Envelope::error_reply(Endpoint::for_mud(mud_name), RATE_LIMITED, "rate limit exceeded");
            record.send(&reply);
            return;
        }
    }

    if matches!(envelope.kind, MessageKind::Auth) {
        return;
    }
    if matches!(envelope.kind, MessageKind::Error) {
        return;
    }

    router::route(state, envelope, mud_name).await;
}

fn respond_pong(record: &Arc<ConnectionRecord>, mud_name: &str, envelope: &Envelope) {
    let timestamp = match &envelope.payload {
        Payload::PingPong(p) => p.timestamp,
        _ => chrono::Utc::now().timestamp(),
    };
    let reply = Envelope::gateway_reply(
        Endpoint::for_mud(mud_name),
        MessageKind::Pong,
        Payload::PingPong(PingPongPayload { timestamp }),
        envelope.metadata.priority,
    );
    record.send(&reply);
}

fn send_error_and_close(
    record: &Arc<ConnectionRecord>,
    code: intermud_protocol::error_codes::GatewayErrorCode,
    message: impl Into<String>,
) {
    let reply = Envelope::error_reply(Endpoint::for_mud("unknown"), code, message.into());
    record.send(&reply);
    record.request_close();
}
