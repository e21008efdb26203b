//! Drover Operator CLI
//!
//! Runs the interactive operator console against a relay hub.

use clap::Parser;
use drover_operator::{Console, OperatorConfig};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "drover-operator",
    about = "Interactive operator console for a drover relay hub",
    version,
    long_about = "Connects to the hub, authenticates with the shared secret, and\n\
                  serves a line-oriented console: list and select agents, relay\n\
                  file-manager commands, and watch agent events as they arrive.\n\
                  On connection loss the console redials with a fixed delay up to\n\
                  a bounded number of attempts; after that, \"reconnect\" retries\n\
                  manually.\n\n\
                  Examples:\n  \
                  # Connect to a local hub\n  \
                  drover-operator --secret change-me\n\n  \
                  # Remote hub, slower redial\n  \
                  drover-operator \\\n    \
                  --hub ws://hub.example.net:8080 \\\n    \
                  --secret change-me \\\n    \
                  --reconnect-delay 10"
)]
struct Cli {
    /// WebSocket URL of the hub
    #[arg(long, default_value = "ws://127.0.0.1:8080", env = "DROVER_HUB_URL")]
    hub: String,

    /// Shared secret presented in the first frame
    #[arg(long, env = "DROVER_OPERATOR_SECRET")]
    secret: String,

    /// Seconds between automatic reconnect attempts
    #[arg(long, default_value_t = 3, env = "DROVER_RECONNECT_DELAY")]
    reconnect_delay: u64,

    /// Automatic reconnect attempts before waiting for a manual "reconnect"
    #[arg(long, default_value_t = 5, env = "DROVER_MAX_RECONNECTS")]
    max_reconnects: u32,

    /// Enable verbose logging (written to stderr; stdout stays the console)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing. Logs go to stderr so the console output on
    // stdout stays clean.
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "drover_operator=debug".into())
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "drover_operator=warn".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = OperatorConfig::default()
        .with_hub_url(cli.hub)
        .with_secret(cli.secret)
        .with_reconnect_delay(Duration::from_secs(cli.reconnect_delay))
        .with_max_reconnect_attempts(cli.max_reconnects);

    if let Err(message) = config.validate() {
        anyhow::bail!(message);
    }

    Console::new(config).run().await?;

    Ok(())
}
