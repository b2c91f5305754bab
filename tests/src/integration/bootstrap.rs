//! Bootstrap and liveness scenarios.

use super::common::{mesh_id, perfect_mesh};
use hm_04_rpc::adapters::MemoryNetwork;
use node_runtime::{Peer, PeerBuilder, PeerConfig};
use std::sync::Arc;

#[tokio::test]
async fn test_ten_peers_ping_from_first() {
    let mesh = perfect_mesh(10).await;

    assert_eq!(
        mesh.peers[0].peer_map().all().len(),
        9,
        "the first peer knows all nine others"
    );
    for other in &mesh.peers[1..] {
        mesh.peers[0]
            .ping(other.advertised_address())
            .await_result()
            .await
            .expect("every ping succeeds");
    }

    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_bootstrap_discovers_neighborhood() {
    let network = MemoryNetwork::new();
    let mut peers: Vec<Arc<Peer>> = Vec::new();
    for index in 0..5 {
        let peer = PeerBuilder::new(PeerConfig::for_testing())
            .peer_id(mesh_id(index))
            .network(Arc::clone(&network))
            .build()
            .expect("peer builds");
        // Chain-bootstrap: every newcomer joins through the first peer.
        if let Some(first) = peers.first() {
            peer.bootstrap(first.advertised_address())
                .await_result()
                .await
                .expect("bootstrap succeeds");
        }
        peers.push(peer);
    }

    let last = peers.last().expect("five peers");
    assert!(
        last.peer_map().all().len() >= 2,
        "bootstrap through one seed still discovers the wider neighborhood, knew {}",
        last.peer_map().all().len()
    );

    for peer in &peers {
        peer.shutdown().await;
    }
}

#[tokio::test]
async fn test_quit_removes_peer_from_neighbors() {
    let mesh = perfect_mesh(3).await;

    mesh.peers[2].shutdown().await;
    // QUIT announcements settle synchronously on the in-memory wire.
    assert!(
        !mesh.peers[0]
            .peer_map()
            .contains_verified(&mesh.peers[2].peer_id()),
        "announced shutdown removed the peer from neighbor maps"
    );

    mesh.peers[0].shutdown().await;
    mesh.peers[1].shutdown().await;
}
