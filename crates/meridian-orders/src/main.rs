//! Order service binary.

use std::net::SocketAddr;

use clap::Parser;

use meridian_common::config::{JwtConfig, SecurityConfig};
use meridian_common::telemetry::{init_telemetry, TelemetryConfig};
use meridian_orders::identity::IdentityGatewayConfig;
use meridian_orders::{OrdersServer, OrdersServerConfig};

/// Meridian order service: saga-driven order creation and status tracking.
#[derive(Parser, Debug)]
#[command(name = "meridian-orders", version, about, long_about = None)]
struct Args {
    /// Listen address for the gRPC server
    #[arg(long, env = "MERIDIAN_ORDERS_ADDR", default_value = "0.0.0.0:50052")]
    listen: SocketAddr,

    /// Identity service address (scheme included)
    #[arg(
        long,
        env = "MERIDIAN_IDENTITY_ADDRESS",
        default_value = "http://127.0.0.1:50051"
    )]
    identity_address: String,

    /// Use TLS towards the identity service
    #[arg(long, env = "MERIDIAN_IDENTITY_TLS", default_value_t = false)]
    identity_tls: bool,

    /// Server security posture: none, basic, or full
    #[arg(long, env = "MERIDIAN_SERVER_AUTH_MODE", default_value = "full")]
    server_auth_mode: String,

    /// Outgoing-call token handling: none, propagate, or validate
    #[arg(long, env = "MERIDIAN_CLIENT_AUTH_MODE", default_value = "propagate")]
    client_auth_mode: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    init_telemetry(TelemetryConfig {
        service_name: "meridian-orders".to_string(),
    })?;

    let mut security = SecurityConfig::from_env()?;
    security.server_mode = args.server_auth_mode.parse()?;
    security.client_mode = args.client_auth_mode.parse()?;

    let mut identity = IdentityGatewayConfig::new(args.identity_address);
    identity.channel.tls = args.identity_tls;

    let config = OrdersServerConfig {
        jwt: JwtConfig::from_env()?,
        security,
        identity,
    };

    let server = OrdersServer::new(config, std::sync::Arc::new(meridian_common::SystemClock))?;
    server.serve(args.listen).await?;
    Ok(())
}
