//! Bassline node daemon.
//!
//! Loads a Bassline definition from `BASSLINE_FILE`, joins it with
//! configuration taken from the environment, and runs until interrupted.

use bassline_node::{BasslineNode, NodeConfig};
use bassline_topology::Bassline;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bassline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::var("BASSLINE_FILE")
        .map_err(|_| "BASSLINE_FILE must point at a bassline definition")?;
    let bassline: Bassline = serde_json::from_slice(&std::fs::read(&path)?)?;

    tracing::info!(id = %bassline.id, version = %bassline.version, %path, "loaded bassline definition");

    let config = NodeConfig::from_env();
    let node = BasslineNode::join(bassline, config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");
    node.shutdown().await;

    Ok(())
}
