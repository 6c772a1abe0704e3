//! Gateway-Handled Ops (spec §4.4): `who`, `mudlist`, `channels`, `locate`,
//! plus a membership-gated channel path reached by addressing a `channel`
//! envelope directly to `mud: "Gateway"` rather than `"*"`.
//!
//! The broadcast path (`to.mud == "*"`) stays a plain, kind-agnostic
//! fan-out in [`crate::router`] — a `channel` envelope sent there reaches
//! every peer unconditionally, matching the router's decision tree
//! literally. This module is the *other* way a MUD can post to a channel:
//! addressed to the gateway, it goes through [`intermud_channels::ChannelService`]
//! for membership, ban, and history bookkeeping before fanning out.

use std::sync::Arc;

use intermud_protocol::error_codes::{CHANNEL_NOT_FOUND, INVALID_MESSAGE, PROTOCOL_ERROR, UNAUTHORIZED};
use intermud_protocol::{
    ChannelAction, ChannelPayload, Endpoint, Envelope, MessageKind, Payload, SortOrder, WhoPayload,
};
use rand::seq::SliceRandom;
use serde_json::json;

use crate::state::GatewayState;

pub async fn handle(state: &Arc<GatewayState>, envelope: Envelope) {
    let reply = match (&envelope.kind, &envelope.payload) {
        (MessageKind::Who, Payload::Who(who)) if who.request => Some(handle_who(state, &envelope, who).await),
        (MessageKind::Mudlist, Payload::Request(req)) if req.request => Some(handle_mudlist(state, &envelope).await),
        (MessageKind::Channels, Payload::Request(req)) if req.request => {
            Some(handle_channels(state, &envelope).await)
        },
        (MessageKind::Locate, Payload::Locate(locate)) if locate.request => {
            Some(handle_locate(state, &envelope).await)
        },
        (MessageKind::Channel, Payload::Channel(payload)) => {
            Some(handle_channel(state, &envelope, payload).await)
        },
        _ => Some(Envelope::error_reply(
            envelope.from.clone(),
            PROTOCOL_ERROR,
            format!("gateway does not handle `{}` with this payload", envelope.kind.as_str()),
        )),
    };

    if let Some(reply) = reply {
        if let Some(conn) = state.connection_by_mud(&envelope.from.mud).await {
            conn.send(&reply);
        }
    }
}

async fn handle_who(state: &Arc<GatewayState>, envelope: &Envelope, who: &WhoPayload) -> Envelope {
    let now = std::time::Instant::now();
    let mut users: Vec<_> = state
        .authenticated_peers()
        .await
        .into_iter()
        .map(|(mud, conn)| {
            let idle = now.saturating_duration_since(conn.last_seen_at()).as_secs();
            json!({
                "username": mud,
                "location": conn.host,
                "idle": idle,
                "flags": ["mud", "system"],
            })
        })
        .collect();

    match who.sort {
        Some(SortOrder::Alpha) => users.sort_by(|a, b| a["username"].as_str().cmp(&b["username"].as_str())),
        Some(SortOrder::Idle) => users.sort_by_key(|u| u["idle"].as_u64().unwrap_or(0)),
        Some(SortOrder::Level) | None => {},
        Some(SortOrder::Random) => users.shuffle(&mut rand::rng()),
    }

    gateway_reply(envelope, MessageKind::Who, json!({ "request": false, "users": users }))
}

async fn handle_mudlist(state: &Arc<GatewayState>, envelope: &Envelope) -> Envelope {
    let now = std::time::Instant::now();
    let muds: Vec<_> = state
        .authenticated_peers()
        .await
        .into_iter()
        .map(|(mud, conn)| {
            let uptime = now.saturating_duration_since(conn.connected_at).as_secs();
            json!({
                "name": mud,
                "host": conn.host,
                "version": intermud_protocol::PROTOCOL_VERSION,
                "uptime": uptime,
            })
        })
        .collect();

    gateway_reply(envelope, MessageKind::Mudlist, json!({ "request": false, "muds": muds }))
}

async fn handle_channels(state: &Arc<GatewayState>, envelope: &Envelope) -> Envelope {
    let channels: Vec<_> = state
        .channels
        .list()
        .await
        .into_iter()
        .map(|summary| {
            json!({
                "name": summary.name,
                "description": summary.description,
                "memberCount": summary.member_count,
                "flags": summary.flags,
            })
        })
        .collect();

    gateway_reply(envelope, MessageKind::Channels, json!({ "request": false, "channels": channels }))
}

async fn handle_locate(state: &Arc<GatewayState>, envelope: &Envelope) -> Envelope {
    let records: Vec<_> = state
        .authenticated_peers()
        .await
        .into_iter()
        .map(|(mud, _)| json!({ "mud": mud, "online": true }))
        .collect();

    gateway_reply(envelope, MessageKind::Locate, json!({ "request": false, "locations": records }))
}

async fn handle_channel(state: &Arc<GatewayState>, envelope: &Envelope, payload: &ChannelPayload) -> Envelope {
    let from = &envelope.from;
    let result = match payload.action {
        ChannelAction::Join => state.channels.join(&payload.channel, from).await.map(|_| None),
        ChannelAction::Leave => state.channels.leave(&payload.channel, from).await.map(|_| None),
        ChannelAction::List => {
            let summary = state.channels.list().await;
            Ok(Some(json!({ "channels": summary.iter().map(|s| s.name.clone()).collect::<Vec<_>>() })))
        },
        ChannelAction::Message => {
            let Some(text) = &payload.message else {
                return Envelope::error_reply(
                    from.clone(),
                    INVALID_MESSAGE,
                    "channel message action requires a message field",
                );
            };
            match state.channels.send(&payload.channel, from, text).await {
                Ok(post) => {
                    deliver_channel_post(state, &post).await;
                    Ok(None)
                },
                Err(e) => Err(e),
            }
        },
    };

    match result {
        Ok(extra) => {
            let mut body = json!({
                "channel": payload.channel,
                "action": payload.action,
                "request": false,
            });
            if let (Some(extra), Some(map)) = (extra, body.as_object_mut()) {
                if let Some(extra_map) = extra.as_object() {
                    for (k, v) in extra_map {
                        map.insert(k.clone(), v.clone());
                    }
                }
            }
            gateway_reply(envelope, MessageKind::Channel, body)
        },
        Err(e) => {
            let code = match e {
                intermud_channels::Error::NotFound(_) => CHANNEL_NOT_FOUND,
                intermud_channels::Error::AlreadyExists(_) => INVALID_MESSAGE,
                _ => UNAUTHORIZED,
            };
            Envelope::error_reply(from.clone(), code, e.to_string())
        },
    }
}

/// Fan the channel message out to every distinct destination MUD's
/// connection, once per MUD (spec §4.5 `messagePosted`).
async fn deliver_channel_post(state: &Arc<GatewayState>, post: &intermud_channels::ChannelPost) {
    let mut envelope = Envelope::gateway_reply(
        Endpoint::for_mud("*"),
        MessageKind::Channel,
        Payload::Channel(ChannelPayload {
            channel: post.channel.clone(),
            action: ChannelAction::Message,
            message: Some(post.text.clone()),
        }),
        5,
    );
    envelope.from = post.from.clone();

    for mud in &post.destination_muds {
        if let Some(conn) = state.connection_by_mud(mud).await {
            let mut targeted = envelope.clone();
            targeted.to = Endpoint::for_mud(mud.clone());
            conn.send(&targeted);
        }
    }
}

fn gateway_reply(envelope: &Envelope, kind: MessageKind, body: serde_json::Value) -> Envelope {
    Envelope::gateway_reply(envelope.from.clone(), kind, Payload::Opaque(body), envelope.metadata.priority)
}
