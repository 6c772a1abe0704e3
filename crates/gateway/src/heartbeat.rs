//! Liveness ticker (spec §4.2): every tick, ping connections idle past the
//! heartbeat interval and drop connections idle past the timeout.
//!
//! This is a protocol-level ping distinct from the application-visible
//! `ping`/`pong` message kind: the gateway issues it to detect a dead
//! socket, not as a routable frame a MUD would see in its inbox.

use std::sync::Arc;
use std::time::Duration;

use intermud_protocol::{Endpoint, Envelope, MessageKind, Payload, PingPongPayload};

use crate::state::GatewayState;

/// Spawn the background ticker. Runs until the process exits; there is no
/// cancellation handle because the gateway has no graceful-shutdown phase
/// for individual connections beyond their own read-loop termination.
pub fn spawn(state: Arc<GatewayState>) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(state.config.heartbeat_interval_sec);
        let timeout = Duration::from_secs(state.config.heartbeat_timeout_sec);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            tick(&state, timeout).await;
        }
    });
}

async fn tick(state: &Arc<GatewayState>, timeout: Duration) {
    let now = std::time::Instant::now();
    let connections: Vec<_> = state.connections.read().await.values().cloned().collect();

    for conn in connections {
        let idle = now.saturating_duration_since(conn.last_seen_at());
        if idle >= timeout {
            tracing::info!(conn_id = %conn.id, idle_secs = idle.as_secs(), "heartbeat: dropping stale connection");
            conn.request_close();
            continue;
        }

        if conn.is_authenticated() && idle >= timeout / 2 {
            let ping = Envelope::gateway_reply(
                Endpoint::for_mud(conn.mud_name().unwrap_or_default()),
                MessageKind::Ping,
                Payload::PingPong(PingPongPayload {
                    timestamp: chrono::Utc::now().timestamp(),
                }),
                5,
            );
            if !conn.send(&ping) {
                tracing::debug!(conn_id = %conn.id, "heartbeat: send failed, connection likely dead");
            }
        }
    }
}
