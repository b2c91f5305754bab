//! Reference node entry point.
//!
//! Builds one peer over the in-memory wire and runs until interrupted. A
//! production deployment replaces the in-memory network with a real socket
//! transport implementing the same `Wire` port; the assembly and lifecycle
//! are identical.

use std::path::Path;

use hm_04_rpc::adapters::MemoryNetwork;
use mesh_telemetry::{init_telemetry, TelemetryConfig};
use node_runtime::{load_config, PeerBuilder, PeerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_telemetry(&TelemetryConfig::from_env())?;

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(Path::new(&path))?,
        None => PeerConfig::default(),
    };

    let network = MemoryNetwork::new();
    let peer = PeerBuilder::new(config).network(network).build()?;
    info!(peer = ?peer.peer_id(), "node running, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    peer.shutdown().await;
    Ok(())
}
