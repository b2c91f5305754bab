//! # Node Runtime
//!
//! Assembles a HiveMesh peer from its subsystems and exposes the top-level
//! handle: `bootstrap`, `ping`, `put`, `add`, `get`, `remove`, `digest`,
//! `send_direct`, `broadcast`, `shutdown` — each returning a completion
//! promise.

pub mod builder;
pub mod config;
pub mod peer;
pub mod toml_config;

pub use builder::{BuildError, PeerBuilder};
pub use config::{Capabilities, ConfigError, PeerConfig};
pub use peer::{Peer, PutOptions};
pub use toml_config::{load_config, parse_config, TomlConfigError};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hm_02_storage::DataEntry;
    use hm_04_rpc::adapters::MemoryNetwork;
    use shared_crypto::hash_str;
    use shared_types::{Id160, Key640};

    use super::*;

    async fn two_peer_network() -> (Arc<MemoryNetwork>, Arc<Peer>, Arc<Peer>) {
        let network = MemoryNetwork::new();
        let a = PeerBuilder::new(PeerConfig::for_testing())
            .peer_id(Id160::from_low_u8(1))
            .network(Arc::clone(&network))
            .build()
            .expect("peer a builds");
        let b = PeerBuilder::new(PeerConfig::for_testing())
            .peer_id(Id160::from_low_u8(2))
            .network(Arc::clone(&network))
            .build()
            .expect("peer b builds");
        b.bootstrap(a.advertised_address())
            .await_result()
            .await
            .expect("bootstrap succeeds");
        (network, a, b)
    }

    #[tokio::test]
    async fn test_put_then_get_on_two_peers() {
        let (_network, a, b) = two_peer_network().await;

        let key = Key640::from_location(hash_str("apple"));
        b.put(key, DataEntry::new(b"red".to_vec()), PutOptions::default())
            .await_result()
            .await
            .expect("put settles");

        let got = a
            .get(key)
            .await_result()
            .await
            .expect("get settles")
            .expect("value found");
        assert_eq!(got.payload(), b"red");

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_operations_after_shutdown_fail_with_sentinel() {
        let (_network, a, b) = two_peer_network().await;
        b.shutdown().await;

        let key = Key640::from_location(hash_str("pear"));
        let result = b
            .put(key, DataEntry::new(vec![1]), PutOptions::default())
            .await_result()
            .await;
        assert_eq!(result, Err(hm_04_rpc::FailReason::Shutdown));

        a.shutdown().await;
    }

    #[tokio::test]
    async fn test_builder_requires_a_network() {
        assert!(matches!(
            PeerBuilder::new(PeerConfig::for_testing()).build(),
            Err(BuildError::MissingNetwork)
        ));
    }
}
