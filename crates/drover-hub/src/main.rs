//! Drover Hub CLI
//!
//! Runs the relay hub that bridges remote agents and operator consoles.

use clap::Parser;
use drover_hub::{HubConfig, HubServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "drover-hub",
    about = "Relay hub bridging remote agents and operator consoles",
    version,
    long_about = "The hub accepts agents and operators on one WebSocket endpoint,\n\
                  classifying each connection by its first frame. Agent events are\n\
                  relayed to every operator; operator commands are routed back to\n\
                  agents. Plain HTTP requests on the same port get a JSON status\n\
                  page.\n\n\
                  Examples:\n  \
                  # Listen on the default port\n  \
                  drover-hub --operator-secret change-me\n\n  \
                  # Custom port and wallpaper directory\n  \
                  drover-hub \\\n    \
                  --listen 0.0.0.0:9090 \\\n    \
                  --operator-secret change-me \\\n    \
                  --media-dir /var/lib/drover/wallpapers"
)]
struct Cli {
    /// Listen address for the combined HTTP/WebSocket endpoint
    #[arg(short = 'l', long, default_value = "0.0.0.0:8080", env = "DROVER_LISTEN")]
    listen: SocketAddr,

    /// Shared secret operators present in their first frame
    #[arg(long, env = "DROVER_OPERATOR_SECRET")]
    operator_secret: String,

    /// Seconds a new connection may stay silent before it is dropped
    #[arg(long, default_value_t = 10, env = "DROVER_NEGOTIATION_TIMEOUT")]
    negotiation_timeout: u64,

    /// Seconds between liveness probes
    #[arg(long, default_value_t = 30, env = "DROVER_PING_INTERVAL")]
    ping_interval: u64,

    /// Directory agent wallpapers are persisted under
    #[arg(long, default_value = "./wallpapers", env = "DROVER_MEDIA_DIR")]
    media_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "drover_hub=debug,tower_http=debug".into())
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "drover_hub=info".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Drover hub");
    tracing::info!("Listen: {}", cli.listen);
    tracing::info!("Negotiation timeout: {}s", cli.negotiation_timeout);
    tracing::info!("Ping interval: {}s", cli.ping_interval);
    tracing::info!("Media directory: {}", cli.media_dir.display());

    let config = HubConfig::default()
        .with_bind_addr(cli.listen)
        .with_operator_secret(cli.operator_secret)
        .with_negotiation_timeout(Duration::from_secs(cli.negotiation_timeout))
        .with_ping_interval(Duration::from_secs(cli.ping_interval))
        .with_media_dir(cli.media_dir);

    HubServer::new(config).run().await?;

    Ok(())
}
