//! Relay scenarios: an unreachable peer served by relays.

use hm_02_storage::DataEntry;
use node_runtime::{PeerBuilder, PeerConfig, PutOptions};
use shared_types::{Id160, Key640};
use std::sync::Arc;

use super::common::{mesh_id, perfect_mesh};

#[tokio::test]
async fn test_unreachable_peer_stores_replicas_via_relay() {
    let mesh = perfect_mesh(4).await;

    // A firewalled newcomer joins through the first peer.
    let unreachable = PeerBuilder::new(PeerConfig {
        behind_firewall: true,
        ..PeerConfig::for_testing()
    })
    .peer_id(Id160::from_low_u64(1 << 12))
    .network(Arc::clone(&mesh.network))
    .time_source(mesh.clock.clone())
    .build()
    .expect("firewalled peer builds");

    unreachable
        .bootstrap(mesh.peers[0].advertised_address())
        .await_result()
        .await
        .expect("bootstrap with relay setup succeeds");

    let advertised = unreachable.advertised_address();
    assert!(advertised.relayed, "the peer advertises its relays");
    assert!(!advertised.relay_sockets.is_empty());

    // A third party stores under the unreachable peer's own id; the
    // replicas must include the unreachable peer, reached via its relay.
    let key = Key640::from_location(unreachable.peer_id());
    let report = mesh.peers[1]
        .put(key, DataEntry::new(b"relayed".to_vec()), PutOptions::default())
        .await_result()
        .await
        .expect("put settles");
    assert!(report.any_ok());

    let stored = unreachable.storage().get(key).await;
    assert_eq!(
        stored.map(|e| e.payload().to_vec()),
        Some(b"relayed".to_vec()),
        "the unreachable peer holds the replica"
    );

    unreachable.shutdown().await;
    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_direct_send_reaches_unreachable_peer() {
    use hm_06_operations::DirectDataHandler;
    use shared_types::PeerAddress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        received: AtomicUsize,
    }
    impl DirectDataHandler for Recorder {
        fn receive(&self, _from: &PeerAddress, payload: Vec<u8>) {
            assert_eq!(payload, b"hello through the wall".to_vec());
            self.received.fetch_add(1, Ordering::SeqCst);
        }
    }

    let mesh = perfect_mesh(3).await;
    let recorder = Arc::new(Recorder::default());

    let unreachable = PeerBuilder::new(PeerConfig {
        behind_firewall: true,
        ..PeerConfig::for_testing()
    })
    .peer_id(mesh_id(10))
    .network(Arc::clone(&mesh.network))
    .time_source(mesh.clock.clone())
    .direct_handler(recorder.clone())
    .build()
    .expect("firewalled peer builds");

    unreachable
        .bootstrap(mesh.peers[0].advertised_address())
        .await_result()
        .await
        .expect("bootstrap succeeds");

    let acked = mesh.peers[1]
        .send_direct(
            unreachable.peer_id(),
            b"hello through the wall".to_vec(),
            false,
        )
        .await_result()
        .await
        .expect("send settles");

    assert!(
        acked.contains(&unreachable.peer_id()),
        "the unreachable peer acknowledged through its relay"
    );
    assert!(recorder.received.load(Ordering::SeqCst) >= 1);

    unreachable.shutdown().await;
    mesh.shutdown_all().await;
}
