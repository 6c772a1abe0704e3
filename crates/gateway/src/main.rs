use std::net::SocketAddr;

use clap::Parser;
use intermud_common::config::GatewayConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    intermud_common::logging::init_tracing();

    let cli = GatewayConfig::parse();
    let config = GatewayConfig::load_with_file(cli, Some(std::path::Path::new("intermud-gateway.toml")))?;

    let (router, _state) = intermud_gateway::server::build(config.clone()).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.ws_port));
    tracing::info!(%addr, "intermud-gateway: listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
