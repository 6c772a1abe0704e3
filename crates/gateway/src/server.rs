//! axum router assembly and startup wiring (spec §6 external interfaces).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::routing::get;
use axum::Router;
use intermud_auth::{AllowAllCredentialStore, SqliteCredentialStore};
use intermud_channels::ChannelService;
use intermud_common::config::GatewayConfig;
use intermud_common::{Error, Result};
use intermud_ratelimit::{Limits, RateLimit, RateLimiter};
use intermud_registry::SqliteRegistry;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tower_http::trace::TraceLayer;

use crate::state::GatewayState;
use crate::{heartbeat, ws};

/// Build the fully wired [`GatewayState`] and the axum [`Router`] on top of
/// it. Split out from `main` so integration tests can construct both
/// without binding a real socket.
pub async fn build(config: GatewayConfig) -> Result<(Router, Arc<GatewayState>)> {
    config.validate().map_err(|e| Error::message(e.to_string()))?;

    let connect_options = SqliteConnectOptions::new()
        .filename(&config.database_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(connect_options)
        .await
        .map_err(|e| Error::message(format!("opening database: {e}")))?;

    let registry = Arc::new(
        SqliteRegistry::new(pool.clone())
            .await
            .map_err(|e| Error::message(format!("initializing registry schema: {e}")))?,
    );

    let credentials: Arc<dyn intermud_auth::CredentialStore> = if config.require_credential {
        Arc::new(
            SqliteCredentialStore::new(pool)
                .await
                .map_err(|e| Error::message(format!("initializing credential store: {e}")))?,
        )
    } else {
        Arc::new(AllowAllCredentialStore)
    };

    let channels = Arc::new(ChannelService::new(registry.clone() as Arc<dyn intermud_registry::RegistryAdapter>));
    channels.load_from_registry().await;

    let rate_limit_cfg = config.rate_limit_config();
    let rate_limiter = RateLimiter::new(Limits {
        connect: RateLimit::per_minute(rate_limit_cfg.connect_per_ip_per_minute as usize),
        message: RateLimit::per_minute(rate_limit_cfg.per_peer_messages_per_minute as usize),
        tell: RateLimit::per_minute(rate_limit_cfg.per_peer_tells_per_minute as usize),
        channel: RateLimit::per_minute(rate_limit_cfg.per_peer_channels_per_minute as usize),
    });

    let state = GatewayState::new(
        channels,
        registry as Arc<dyn intermud_registry::RegistryAdapter>,
        credentials,
        rate_limiter,
        config,
    );

    heartbeat::spawn(Arc::clone(&state));

    let router = Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    Ok((router, state))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<GatewayState>>,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| ws::handle_connection(socket, state, remote_addr))
}

async fn healthz(State(state): State<Arc<GatewayState>>) -> String {
    format!("{{\"status\":\"ok\",\"peers\":{}}}", state.peer_count().await)
}
