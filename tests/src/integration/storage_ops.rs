//! Replicated storage scenarios: put/get under churn, TTL, protection.

use hm_02_storage::{DataEntry, StorageResult};
use node_runtime::PutOptions;
use shared_crypto::hash_str;
use shared_crypto::test_utils::TestKeyPair;
use shared_types::{Id160, Key640};

use super::common::perfect_mesh;

#[tokio::test]
async fn test_put_get_on_single_peer_network() {
    let mesh = perfect_mesh(1).await;
    let key = Key640::from_location(hash_str("solo"));

    let report = mesh.peers[0]
        .put(key, DataEntry::new(b"value".to_vec()), PutOptions::default())
        .await_result()
        .await
        .expect("put settles");
    assert!(report.any_ok(), "the lone peer stores locally");

    let got = mesh.peers[0]
        .get(key)
        .await_result()
        .await
        .expect("get settles")
        .expect("value present");
    assert_eq!(got.payload(), b"value");

    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_get_survives_loss_of_closest_replica() {
    let mesh = perfect_mesh(10).await;
    let location = hash_str("apple");
    let key = Key640::from_location(location);

    let report = mesh.peers[0]
        .put(key, DataEntry::new(b"red".to_vec()), PutOptions::default())
        .await_result()
        .await
        .expect("put settles");
    assert!(
        report.ok_count() >= 2,
        "replication factor 3 yields several live replicas, got {}",
        report.ok_count()
    );

    // Kill the replica closest to the location.
    let closest = mesh.closest_index(&location);
    mesh.peers[closest].shutdown().await;

    // Any surviving peer can still read the value.
    let reader = (0..mesh.peers.len())
        .find(|i| *i != closest)
        .expect("another peer exists");
    let got = mesh.peers[reader]
        .get(key)
        .await_result()
        .await
        .expect("get settles")
        .expect("value survived the churn");
    assert_eq!(got.payload(), b"red");

    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_ttl_expiry_empties_storage() {
    let mesh = perfect_mesh(3).await;
    let key = Key640::from_location(hash_str("ephemeral"));

    mesh.peers[0]
        .put(
            key,
            DataEntry::new(b"gone soon".to_vec()).with_ttl(1),
            PutOptions::default(),
        )
        .await_result()
        .await
        .expect("put settles");
    assert!(
        mesh.peers[0]
            .get(key)
            .await_result()
            .await
            .unwrap()
            .is_some(),
        "entry readable before expiry"
    );

    // Two seconds of clock, then let the 100ms sweepers fire.
    mesh.clock.advance(2_000);
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;

    assert!(
        mesh.peers[0]
            .get(key)
            .await_result()
            .await
            .unwrap()
            .is_none(),
        "expired entry reads as absent"
    );
    for peer in &mesh.peers {
        assert_eq!(
            peer.storage().len(),
            0,
            "sweeper removed the expired entry everywhere"
        );
    }

    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_domain_protection_rejects_second_claimer() {
    let mesh = perfect_mesh(5).await;
    let alice = TestKeyPair::from_low_u8(1);
    let bob = TestKeyPair::from_low_u8(2);

    let location = hash_str("claimed-domain");
    let domain = Id160::from_low_u8(7);
    let key_a = Key640::new(location, domain, Id160::ZERO, Id160::ZERO);
    let key_b = Key640::new(location, domain, Id160::from_low_u8(1), Id160::ZERO);

    let report = mesh.peers[0]
        .put(
            key_a,
            DataEntry::new(b"alice owns this".to_vec()),
            PutOptions {
                public_key: Some(alice.public_key().clone()),
                claim_domain: true,
                ..PutOptions::default()
            },
        )
        .await_result()
        .await
        .expect("put settles");
    assert!(report.majority_ok(), "first claim binds the domain");

    let report = mesh.peers[1]
        .put(
            key_b,
            DataEntry::new(b"bob wants in".to_vec()),
            PutOptions {
                public_key: Some(bob.public_key().clone()),
                claim_domain: true,
                ..PutOptions::default()
            },
        )
        .await_result()
        .await
        .expect("put settles");
    assert!(!report.any_ok(), "every replica rejects the second key");
    assert_eq!(
        report.first_error(),
        Some(StorageResult::FailedSecurity),
        "the denial is a protection failure"
    );

    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_add_derives_content_key_from_payload() {
    let mesh = perfect_mesh(3).await;
    let location = hash_str("bucket");

    let (key, report) = mesh.peers[0]
        .add(
            location,
            Id160::ZERO,
            DataEntry::new(b"content-addressed".to_vec()),
            PutOptions::default(),
        )
        .await_result()
        .await
        .expect("add settles");
    assert!(report.any_ok());
    assert_eq!(
        key.content,
        shared_crypto::hash_bytes(b"content-addressed"),
        "content coordinate is the payload hash"
    );

    let got = mesh.peers[1]
        .get(key)
        .await_result()
        .await
        .expect("get settles")
        .expect("entry found under derived key");
    assert_eq!(got.payload(), b"content-addressed");

    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_remove_deletes_across_replicas() {
    let mesh = perfect_mesh(5).await;
    let key = Key640::from_location(hash_str("removable"));

    mesh.peers[0]
        .put(key, DataEntry::new(vec![1, 2, 3]), PutOptions::default())
        .await_result()
        .await
        .expect("put settles");

    let report = mesh.peers[1]
        .remove(key, None)
        .await_result()
        .await
        .expect("remove settles");
    assert!(report.any_ok(), "replicas acknowledged the removal");

    assert!(
        mesh.peers[2]
            .get(key)
            .await_result()
            .await
            .unwrap()
            .is_none(),
        "removed entry is gone network-wide"
    );

    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_digest_reflects_stored_content() {
    let mesh = perfect_mesh(3).await;
    let location = hash_str("digestible");
    let key = Key640::from_location(location);

    mesh.peers[0]
        .put(key, DataEntry::new(b"payload".to_vec()), PutOptions::default())
        .await_result()
        .await
        .expect("put settles");

    let (from, to) = Key640::location_range(location);
    let digest = mesh.peers[1]
        .digest(from, to)
        .await_result()
        .await
        .expect("digest settles");
    assert_eq!(digest.entries.get(&key), Some(&shared_crypto::hash_bytes(b"payload")));

    mesh.shutdown_all().await;
}
