//! The peer builder.
//!
//! Collects configuration and collaborators, validates, and assembles the
//! peer arena. Only the network is mandatory; everything else has a sane
//! default (including a deterministic test signature factory — production
//! deployments must inject their real one).

use std::sync::Arc;

use hm_04_rpc::adapters::MemoryNetwork;
use hm_06_operations::{BroadcastHandler, DirectDataHandler, NoopHandler};
use hm_07_replication::ReplicationStrategy;
use rand::Rng;
use shared_crypto::test_utils::{TestKeyPair, TestSignatureFactory};
use shared_crypto::SignatureFactory;
use shared_types::{Id160, PeerAddress, PeerSocket, SystemTimeSource, TimeSource};
use thiserror::Error;

use crate::config::{ConfigError, PeerConfig};
use crate::peer::{Peer, PeerParts};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("a network must be attached before building")]
    MissingNetwork,
}

pub struct PeerBuilder {
    config: PeerConfig,
    peer_id: Option<Id160>,
    socket: Option<PeerSocket>,
    network: Option<Arc<MemoryNetwork>>,
    signature_factory: Option<Arc<dyn SignatureFactory>>,
    time_source: Option<Arc<dyn TimeSource>>,
    direct_handler: Option<Arc<dyn DirectDataHandler>>,
    broadcast_handler: Option<Arc<dyn BroadcastHandler>>,
    replication_strategy: Option<Arc<dyn ReplicationStrategy>>,
}

impl Default for PeerBuilder {
    fn default() -> Self {
        Self::new(PeerConfig::default())
    }
}

impl PeerBuilder {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            peer_id: None,
            socket: None,
            network: None,
            signature_factory: None,
            time_source: None,
            direct_handler: None,
            broadcast_handler: None,
            replication_strategy: None,
        }
    }

    pub fn peer_id(mut self, peer_id: Id160) -> Self {
        self.peer_id = Some(peer_id);
        self
    }

    pub fn socket(mut self, socket: PeerSocket) -> Self {
        self.socket = Some(socket);
        self
    }

    pub fn network(mut self, network: Arc<MemoryNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn signature_factory(mut self, factory: Arc<dyn SignatureFactory>) -> Self {
        self.signature_factory = Some(factory);
        self
    }

    pub fn time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(time_source);
        self
    }

    pub fn direct_handler(mut self, handler: Arc<dyn DirectDataHandler>) -> Self {
        self.direct_handler = Some(handler);
        self
    }

    pub fn broadcast_handler(mut self, handler: Arc<dyn BroadcastHandler>) -> Self {
        self.broadcast_handler = Some(handler);
        self
    }

    pub fn replication_strategy(mut self, strategy: Arc<dyn ReplicationStrategy>) -> Self {
        self.replication_strategy = Some(strategy);
        self
    }

    /// Validate and assemble the peer.
    pub fn build(self) -> Result<Arc<Peer>, BuildError> {
        self.config.validate()?;
        let network = self.network.ok_or(BuildError::MissingNetwork)?;

        let mut rng = rand::thread_rng();
        let peer_id = self.peer_id.unwrap_or_else(|| Id160::random(&mut rng));
        let socket = self
            .socket
            .unwrap_or_else(|| PeerSocket::localhost(rng.gen_range(1024..u16::MAX)));
        let mut address = PeerAddress::new(peer_id, socket);
        if self.config.behind_firewall {
            address = address.firewalled();
        }

        let signature_factory = self.signature_factory.unwrap_or_else(|| {
            Arc::new(TestSignatureFactory::new(TestKeyPair::generate(&mut rng)))
        });

        Ok(Peer::assemble(PeerParts {
            config: self.config,
            address,
            network,
            signature_factory,
            time_source: self
                .time_source
                .unwrap_or_else(|| Arc::new(SystemTimeSource)),
            direct_handler: self
                .direct_handler
                .unwrap_or_else(|| Arc::new(NoopHandler)),
            broadcast_handler: self
                .broadcast_handler
                .unwrap_or_else(|| Arc::new(NoopHandler)),
            replication_strategy: self.replication_strategy,
        }))
    }
}
