//! Routing decision tree (spec §4.3): broadcast, Gateway-addressed, or
//! unicast forward, in that order. Never reached from the wire directly —
//! [`crate::ws`] decodes, rate-limits, and checks TTL first.

use std::sync::Arc;

use intermud_protocol::error_codes::MUD_NOT_FOUND;
use intermud_protocol::{Endpoint, Envelope};

use crate::gateway_ops;
use crate::state::GatewayState;

/// Route one already-decoded, already-authenticated envelope.
///
/// `from_mud` is the authenticated name of the connection that sent this
/// frame; it always wins over whatever the envelope claims, closing the
/// spoofing hole a forged `from.mud` would otherwise open.
pub async fn route(state: &Arc<GatewayState>, mut envelope: Envelope, from_mud: &str) {
    envelope.from.mud = from_mud.to_string();
    state.append_history(&envelope).await;

    if envelope.is_broadcast() {
        broadcast(state, &envelope, from_mud).await;
    } else if envelope.is_gateway_addressed() {
        gateway_ops::handle(state, envelope).await;
    } else {
        unicast(state, envelope, from_mud).await;
    }
}

async fn broadcast(state: &Arc<GatewayState>, envelope: &Envelope, from_mud: &str) {
    for (mud, conn) in state.authenticated_peers().await {
        if mud == from_mud {
            continue;
        }
        if !conn.send(envelope) {
            tracing::debug!(to = %mud, "dropping broadcast, peer send channel closed");
        }
    }
}

async fn unicast(state: &Arc<GatewayState>, envelope: Envelope, from_mud: &str) {
    let to_mud = envelope.to.mud.clone();
    match state.connection_by_mud(&to_mud).await {
        Some(conn) => {
            if !conn.send(&envelope) {
                tracing::debug!(to = %to_mud, "dropping unicast, peer send channel closed");
            }
        },
        None => {
            if let Some(sender) = state.connection_by_mud(from_mud).await {
                let reply = Envelope::error_reply(
                    Endpoint::for_mud(from_mud),
                    MUD_NOT_FOUND,
                    format!("mud `{to_mud}` is not connected"),
                );
                sender.send(&reply);
            }
        },
    }
}
