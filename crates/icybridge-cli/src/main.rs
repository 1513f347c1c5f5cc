//! Icybridge relay server binary
//!
//! Starts the relay service and logs lifecycle events until the process
//! is terminated.

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use icybridge::relay::{RelayConfig, RelayEvent, RelayServer};

#[derive(Parser, Debug)]
#[command(name = "icybridge", about = "ICY/SHOUTcast relay bridge server")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8890")]
    bind: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = RelayConfig {
        bind_addr: args.bind,
        ..RelayConfig::default()
    };

    let (_server, events) = RelayServer::start(config).context("starting relay server")?;

    // Block on the lifecycle event stream; the server threads do the work
    for event in events.iter() {
        match event {
            RelayEvent::Started(addr) => info!(%addr, "listening"),
            RelayEvent::ClientConnected(peer) => info!(%peer, "client connected"),
            RelayEvent::ClientClosed(peer, outcome) => info!(%peer, ?outcome, "client closed"),
            RelayEvent::UpstreamFailed { url, error } => warn!(%url, %error, "upstream failed"),
            RelayEvent::MetadataChanged(metadata) => info!(%metadata, "metadata changed"),
            RelayEvent::Stopped => {
                info!("server stopped");
                break;
            }
        }
    }

    Ok(())
}
