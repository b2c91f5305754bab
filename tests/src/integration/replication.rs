//! Replication convergence: new replicas receive owned content.

use hm_02_storage::DataEntry;
use node_runtime::{PeerBuilder, PeerConfig, PutOptions};
use shared_types::Key640;
use std::sync::Arc;

use super::common::{mesh_id, perfect_mesh};

#[tokio::test]
async fn test_joining_peer_receives_replicas_within_one_interval() {
    // Two peers hold an entry; a third joins close to everything (test ids
    // are sparse, so every peer ranks within R=3).
    let mesh = perfect_mesh(2).await;
    let key = Key640::from_location(shared_crypto::hash_str("replicated"));

    mesh.peers[0]
        .put(key, DataEntry::new(b"copy me".to_vec()), PutOptions::default())
        .await_result()
        .await
        .expect("put settles");

    let newcomer = PeerBuilder::new(PeerConfig::for_testing())
        .peer_id(mesh_id(5))
        .network(Arc::clone(&mesh.network))
        .time_source(mesh.clock.clone())
        .build()
        .expect("newcomer builds");
    newcomer
        .bootstrap(mesh.peers[0].advertised_address())
        .await_result()
        .await
        .expect("bootstrap succeeds");

    // One replication interval (200ms in the test config) plus jitter.
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;

    let replicated = newcomer.storage().get(key).await;
    assert_eq!(
        replicated.map(|e| e.payload().to_vec()),
        Some(b"copy me".to_vec()),
        "the refresh sweep pushed the entry to the new replica"
    );

    newcomer.shutdown().await;
    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_losing_a_replica_triggers_republish() {
    // Four peers, R = 3: exactly one peer starts without the entry.
    let mesh = perfect_mesh(4).await;
    let key = Key640::from_location(shared_crypto::hash_str("rehomed"));

    mesh.peers[0]
        .put(key, DataEntry::new(b"durable".to_vec()), PutOptions::default())
        .await_result()
        .await
        .expect("put settles");

    let mut holders = Vec::new();
    let mut spare = None;
    for (index, peer) in mesh.peers.iter().enumerate() {
        if peer.storage().get(key).await.is_some() {
            holders.push(index);
        } else {
            spare = Some(index);
        }
    }
    assert_eq!(holders.len(), 3, "replication factor 3 placed three copies");
    let spare = spare.expect("one peer outside the replica set");

    // One replica dies; the remaining owners re-publish, pulling the spare
    // peer into the replica set within a sweep.
    let victim = holders[0];
    mesh.peers[victim].shutdown().await;
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;

    let rehomed = mesh.peers[spare].storage().get(key).await;
    assert_eq!(
        rehomed.map(|e| e.payload().to_vec()),
        Some(b"durable".to_vec()),
        "the spare peer received the entry after the loss"
    );

    for index in 0..mesh.peers.len() {
        if index != victim {
            mesh.peers[index].shutdown().await;
        }
    }
}
