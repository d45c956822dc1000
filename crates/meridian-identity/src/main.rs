//! Identity service binary.

use std::net::SocketAddr;

use clap::Parser;

use meridian_common::config::{CacheTtlConfig, JwtConfig, SecurityConfig};
use meridian_common::telemetry::{init_telemetry, TelemetryConfig};
use meridian_identity::{IdentityServer, IdentityServerConfig};

/// Meridian identity service: accounts, profiles, and eligibility checks.
#[derive(Parser, Debug)]
#[command(name = "meridian-identity", version, about, long_about = None)]
struct Args {
    /// Listen address for the gRPC server
    #[arg(long, env = "MERIDIAN_IDENTITY_ADDR", default_value = "0.0.0.0:50051")]
    listen: SocketAddr,

    /// Server security posture: none, basic, or full
    #[arg(long, env = "MERIDIAN_SERVER_AUTH_MODE", default_value = "full")]
    server_auth_mode: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    init_telemetry(TelemetryConfig {
        service_name: "meridian-identity".to_string(),
    })?;

    let mut security = SecurityConfig::from_env()?;
    security.server_mode = args.server_auth_mode.parse()?;

    let config = IdentityServerConfig {
        jwt: JwtConfig::from_env()?,
        security,
        cache: CacheTtlConfig::from_env()?,
    };

    let server = IdentityServer::new(config, std::sync::Arc::new(meridian_common::SystemClock))?;
    server.serve(args.listen).await?;
    Ok(())
}
