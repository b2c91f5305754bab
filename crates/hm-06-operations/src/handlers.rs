//! Server side of the RPC families.
//!
//! Each handler is registered with the dispatcher for one command. Handlers
//! are thin: they bridge messages onto the peer map, the storage layer and
//! the application ports, and build the response.

use std::sync::Arc;

use async_trait::async_trait;
use hm_01_peer_map::{PeerMapService, RemoveReason};
use hm_02_storage::{RemoveOutcome, StorageLayer, StorageResult};
use hm_04_rpc::{
    FailReason, Message, MessageBody, RequestSender, RpcHandler, StoreRequest, StoreResponse,
};
use shared_crypto::SignatureFactory;
use shared_types::Key640;
use tracing::debug;

use crate::broadcast::BroadcastDispatcher;
use crate::ports::DirectDataHandler;

/// Upper bound on digest entries piggybacked onto a NEIGHBORS response.
const NEIGHBORS_DIGEST_LIMIT: usize = 64;

// =============================================================================
// PING
// =============================================================================

pub struct PingHandler {
    pub peer_map: Arc<PeerMapService>,
    pub sender: Arc<RequestSender>,
}

#[async_trait]
impl RpcHandler for PingHandler {
    async fn handle(&self, message: Message) -> Result<Message, FailReason> {
        // A ping proves the sender is alive and reachable.
        let _ = self.peer_map.add(message.sender.clone(), true);
        Ok(message.ok_response(self.sender.self_address(), MessageBody::Empty))
    }
}

// =============================================================================
// QUIT
// =============================================================================

pub struct QuitHandler {
    pub peer_map: Arc<PeerMapService>,
    pub sender: Arc<RequestSender>,
}

#[async_trait]
impl RpcHandler for QuitHandler {
    async fn handle(&self, message: Message) -> Result<Message, FailReason> {
        self.peer_map
            .remove(&message.sender.peer_id, RemoveReason::Shutdown);
        Ok(message.ok_response(self.sender.self_address(), MessageBody::Empty))
    }
}

// =============================================================================
// PEER-EXCHANGE
// =============================================================================

pub struct PeerExchangeHandler {
    pub peer_map: Arc<PeerMapService>,
    pub sender: Arc<RequestSender>,
}

#[async_trait]
impl RpcHandler for PeerExchangeHandler {
    async fn handle(&self, message: Message) -> Result<Message, FailReason> {
        let own_id = self.peer_map.self_id();
        if let MessageBody::PeerExchange { peers } = &message.body {
            // Exchanged peers are hearsay: overflow only.
            for peer in peers {
                if peer.peer_id != own_id {
                    let _ = self.peer_map.add(peer.clone(), false);
                }
            }
        }
        let _ = self.peer_map.add(message.sender.clone(), true);
        Ok(message.ok_response(self.sender.self_address(), MessageBody::Empty))
    }
}

// =============================================================================
// NEIGHBORS
// =============================================================================

pub struct NeighborsHandler {
    pub peer_map: Arc<PeerMapService>,
    pub storage: Arc<StorageLayer>,
    pub sender: Arc<RequestSender>,
    /// Result size of a neighbor query.
    pub k: usize,
}

#[async_trait]
impl RpcHandler for NeighborsHandler {
    async fn handle(&self, message: Message) -> Result<Message, FailReason> {
        let MessageBody::NeighborsQuery { target } = &message.body else {
            return Err(FailReason::ProtocolViolation(
                "neighbors request without target".into(),
            ));
        };
        let target = *target;
        let _ = self.peer_map.add(message.sender.clone(), true);

        let peers = self.peer_map.closest_peers(&target, self.k);
        // Piggyback what we store at the queried location so a get-path can
        // compare replicas without another round trip.
        let (from, to) = Key640::location_range(target);
        let mut digest = self.storage.digest_range(from, to).await;
        let digest = if digest.is_empty() {
            None
        } else {
            while digest.entries.len() > NEIGHBORS_DIGEST_LIMIT {
                let last = *digest.entries.keys().next_back().expect("non-empty");
                digest.entries.remove(&last);
            }
            Some(digest)
        };

        Ok(message.ok_response(
            self.sender.self_address(),
            MessageBody::Neighbors { peers, digest },
        ))
    }
}

// =============================================================================
// STORE
// =============================================================================

pub struct StorageHandler {
    pub storage: Arc<StorageLayer>,
    pub peer_map: Arc<PeerMapService>,
    pub sender: Arc<RequestSender>,
    pub signature_factory: Arc<dyn SignatureFactory>,
}

impl StorageHandler {
    async fn execute(&self, request: StoreRequest) -> StoreResponse {
        match request {
            StoreRequest::Put {
                key,
                entry,
                public_key,
                put_if_absent,
                claim_domain,
            } => {
                // A signed entry that fails verification is rejected before
                // it can touch protection state.
                if entry.is_signed() {
                    if let Some(wire_key) = &entry.public_key {
                        match entry.verify(self.signature_factory.as_ref(), wire_key) {
                            Ok(true) => {}
                            _ => {
                                debug!(?key, "dropping entry with invalid signature");
                                return StoreResponse::Status(StorageResult::FailedSecurity);
                            }
                        }
                    }
                }
                let effective_key = public_key.or_else(|| entry.public_key.clone());
                StoreResponse::Status(
                    self.storage
                        .put(key, entry, effective_key.as_ref(), put_if_absent, claim_domain)
                        .await,
                )
            }
            StoreRequest::Get { key } => {
                let mut entries = std::collections::BTreeMap::new();
                if let Some(entry) = self.storage.get(key).await {
                    entries.insert(key, entry);
                }
                StoreResponse::Entries(entries)
            }
            StoreRequest::GetRange {
                from,
                to,
                key_bloom,
                content_bloom,
            } => StoreResponse::Entries(
                self.storage
                    .get_range_filtered(from, to, key_bloom.as_ref(), content_bloom.as_ref())
                    .await,
            ),
            StoreRequest::Remove { key, public_key } => {
                let status = match self.storage.remove(key, public_key.as_ref()).await {
                    RemoveOutcome::Removed(_) => StorageResult::Ok,
                    RemoveOutcome::NotFound => StorageResult::Failed,
                    RemoveOutcome::Denied => StorageResult::FailedSecurity,
                };
                StoreResponse::Status(status)
            }
            StoreRequest::RemoveRange {
                from,
                to,
                public_key,
            } => StoreResponse::Entries(
                self.storage.remove_range(from, to, public_key.as_ref()).await,
            ),
            StoreRequest::DigestRange { from, to } => {
                StoreResponse::Digest(self.storage.digest_range(from, to).await)
            }
            StoreRequest::DigestBloom {
                branch,
                key_bloom,
                content_bloom,
            } => StoreResponse::Digest(
                self.storage
                    .digest_filtered(branch, key_bloom.as_ref(), content_bloom.as_ref())
                    .await,
            ),
            StoreRequest::DigestKeys { keys } => {
                StoreResponse::Digest(self.storage.digest_keys(&keys).await)
            }
        }
    }
}

#[async_trait]
impl RpcHandler for StorageHandler {
    async fn handle(&self, message: Message) -> Result<Message, FailReason> {
        let MessageBody::Store(request) = message.body.clone() else {
            return Err(FailReason::ProtocolViolation(
                "store request without body".into(),
            ));
        };
        let _ = self.peer_map.add(message.sender.clone(), true);
        let response = self.execute(request).await;
        Ok(message.ok_response(
            self.sender.self_address(),
            MessageBody::StoreOutcome(response),
        ))
    }
}

// =============================================================================
// DIRECT
// =============================================================================

pub struct DirectHandler {
    pub port: Arc<dyn DirectDataHandler>,
    pub sender: Arc<RequestSender>,
}

#[async_trait]
impl RpcHandler for DirectHandler {
    async fn handle(&self, message: Message) -> Result<Message, FailReason> {
        let MessageBody::Direct { payload } = message.body.clone() else {
            return Err(FailReason::ProtocolViolation(
                "direct request without payload".into(),
            ));
        };
        self.port.receive(&message.sender, payload);
        Ok(message.ok_response(self.sender.self_address(), MessageBody::Empty))
    }
}

// =============================================================================
// BROADCAST
// =============================================================================

pub struct BroadcastRpcHandler {
    pub dispatcher: Arc<BroadcastDispatcher>,
    pub sender: Arc<RequestSender>,
}

#[async_trait]
impl RpcHandler for BroadcastRpcHandler {
    async fn handle(&self, message: Message) -> Result<Message, FailReason> {
        let MessageBody::Broadcast {
            broadcast_id,
            hop,
            payload,
        } = &message.body
        else {
            return Err(FailReason::ProtocolViolation(
                "broadcast request without body".into(),
            ));
        };
        self.dispatcher
            .spread(&message.sender, *broadcast_id, *hop, payload);
        Ok(message.ok_response(self.sender.self_address(), MessageBody::Empty))
    }
}
