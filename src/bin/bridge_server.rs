//! Bridge server binary entry point
//!
//! Serves the WebRTC signaling endpoints over an in-memory hub.
//!
//! # Usage
//!
//! ```bash
//! # Default: listen on 0.0.0.0:8080 with Google STUN
//! cargo run --bin bridge_server
//!
//! # Behind NAT with a pinned media port range
//! cargo run --bin bridge_server -- \
//!   --public-ips 203.0.113.10 \
//!   --udp-port-min 50000 --udp-port-max 50100
//! ```

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use streamhub_webrtc::{router, BridgeConfig, BridgeState, MemoryHub};

/// StreamHub WebRTC bridge server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP listen address for signaling
    #[arg(long, default_value = "0.0.0.0:8080", env = "BRIDGE_LISTEN")]
    listen: String,

    /// ICE servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "BRIDGE_ICE_SERVERS"
    )]
    ice_servers: Vec<String>,

    /// Public IPs announced as host candidates (comma-separated)
    #[arg(long, value_delimiter = ',', env = "BRIDGE_PUBLIC_IPS")]
    public_ips: Vec<String>,

    /// Lower bound of the UDP media port range (0 = ephemeral)
    #[arg(long, default_value_t = 0, env = "BRIDGE_UDP_PORT_MIN")]
    udp_port_min: u16,

    /// Upper bound of the UDP media port range (0 = ephemeral)
    #[arg(long, default_value_t = 0, env = "BRIDGE_UDP_PORT_MAX")]
    udp_port_max: u16,

    /// PLI keyframe request interval in milliseconds
    #[arg(long, default_value_t = 2000, env = "BRIDGE_PLI_INTERVAL_MS")]
    pli_interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_default();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = BridgeConfig {
        ice_servers: args.ice_servers,
        public_ips: args.public_ips,
        udp_port_min: args.udp_port_min,
        udp_port_max: args.udp_port_max,
        pli_interval_ms: args.pli_interval_ms,
    };
    config.validate()?;

    let hub = Arc::new(MemoryHub::new());
    let state = Arc::new(BridgeState::new(config, hub)?);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(
        listen = %args.listen,
        version = streamhub_webrtc::version(),
        "bridge server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
