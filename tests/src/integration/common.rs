//! Shared fixtures: meshes of peers over one in-memory network with one
//! controllable clock.

use std::sync::Arc;

use hm_04_rpc::adapters::MemoryNetwork;
use node_runtime::{Peer, PeerBuilder, PeerConfig};
use shared_types::{FixedTimeSource, Id160};

pub struct Mesh {
    pub network: Arc<MemoryNetwork>,
    pub clock: Arc<FixedTimeSource>,
    pub peers: Vec<Arc<Peer>>,
}

/// Peer ids are powers of two, so every pair of peers lands in its own
/// bucket of every map and small bag sizes never evict anyone.
pub fn mesh_id(index: usize) -> Id160 {
    Id160::from_low_u64(1u64 << index)
}

/// Build `n` peers and give every peer a verified entry for every other
/// (perfect routing tables).
pub async fn perfect_mesh(n: usize) -> Mesh {
    perfect_mesh_with(n, PeerConfig::for_testing()).await
}

pub async fn perfect_mesh_with(n: usize, config: PeerConfig) -> Mesh {
    let network = MemoryNetwork::new();
    let clock = Arc::new(FixedTimeSource::new(1_000_000));

    let mut peers = Vec::with_capacity(n);
    for index in 0..n {
        let peer = PeerBuilder::new(config.clone())
            .peer_id(mesh_id(index))
            .network(Arc::clone(&network))
            .time_source(clock.clone())
            .build()
            .expect("peer builds");
        peers.push(peer);
    }
    for peer in &peers {
        for other in &peers {
            if peer.peer_id() != other.peer_id() {
                let _ = peer.peer_map().add(other.advertised_address(), true);
            }
        }
    }
    Mesh {
        network,
        clock,
        peers,
    }
}

impl Mesh {
    /// The index of the peer closest to `target` by XOR distance.
    pub fn closest_index(&self, target: &Id160) -> usize {
        let mut best = 0;
        for (index, peer) in self.peers.iter().enumerate() {
            if peer.peer_id().distance(target) < self.peers[best].peer_id().distance(target) {
                best = index;
            }
        }
        best
    }

    pub async fn shutdown_all(&self) {
        for peer in &self.peers {
            peer.shutdown().await;
        }
    }
}
