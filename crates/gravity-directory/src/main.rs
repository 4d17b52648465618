//! Standalone service directory: domain-scoped component registration and
//! lookup, plus cross-domain anti-entropy sync over UDP beacons.
//!
//! ```bash
//! gravity-directory --port 5555 --domain Lab1
//! gravity-directory --config directory.json
//! ```

use clap::Parser;
use gravity_directory::{DirectoryConfig, DirectoryServer};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "gravity-directory")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to bind the directory's REQ/REP endpoint on.
    #[arg(short, long, default_value = "5555")]
    port: u16,

    /// Administrative domain this directory is authoritative for.
    #[arg(short, long, default_value = "default")]
    domain: String,

    /// Configuration file (JSON format). Overrides the other flags if set.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable the UDP beacon pair for cross-domain discovery.
    #[arg(long, default_value = "false")]
    broadcast: bool,

    /// UDP port the beacon pair broadcasts/listens on.
    #[arg(long, default_value = "5557")]
    broadcast_port: u16,

    /// Beacon broadcast rate, in seconds.
    #[arg(long, default_value = "5")]
    broadcast_rate: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = if let Some(path) = args.config {
        info!(?path, "loading directory config");
        DirectoryConfig::from_file(&path)?
    } else {
        DirectoryConfig {
            bind_url: format!("tcp://*:{}", args.port),
            domain: args.domain,
            broadcast_enabled: args.broadcast,
            broadcast_port: args.broadcast_port,
            broadcast_rate_secs: args.broadcast_rate,
            ..Default::default()
        }
    };
    config.validate()?;

    info!("+----------------------------------------------------+");
    info!("|       Gravity Service Directory v{}             |", env!("CARGO_PKG_VERSION"));
    info!("+----------------------------------------------------+");
    info!("|  Bind:      {:40} |", config.bind_url);
    info!("|  Domain:    {:40} |", config.domain);
    info!(
        "|  Broadcast: {:40} |",
        if config.broadcast_enabled { "enabled" } else { "disabled" }
    );
    info!("+----------------------------------------------------+");

    let server = DirectoryServer::new(config).await?;

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    info!("directory stopped");
    Ok(())
}
