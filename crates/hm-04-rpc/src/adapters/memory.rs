//! In-memory transport with perfect routing.
//!
//! Stands in for the UDP/TCP multiplexer in wiring and tests: every node
//! registers its dispatcher, and calls are delivered synchronously in
//! process. Firewalled peers register but do not *listen* — address-based
//! routing refuses them, exactly like a NAT would, while long-lived
//! channels (the connection an unreachable peer opened itself) still reach
//! them. Relayed addresses route through their relay sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use shared_types::{Id160, PeerAddress, PeerSocket};

use crate::dispatcher::Dispatcher;
use crate::errors::FailReason;
use crate::message::Message;
use crate::ports::{PeerChannel, Wire};

#[derive(Clone)]
struct MemoryNode {
    dispatcher: Arc<Dispatcher>,
    socket: PeerSocket,
    listening: bool,
}

/// The process-wide simulated network.
#[derive(Default)]
pub struct MemoryNetwork {
    nodes: RwLock<HashMap<Id160, MemoryNode>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node. A firewalled address registers without listening.
    pub fn register(&self, address: &PeerAddress, dispatcher: Arc<Dispatcher>) {
        self.nodes.write().expect("network lock poisoned").insert(
            address.peer_id,
            MemoryNode {
                dispatcher,
                socket: address.socket,
                listening: !address.is_unreachable(),
            },
        );
    }

    /// Detach a node (shutdown or simulated crash).
    pub fn unregister(&self, peer_id: &Id160) {
        self.nodes
            .write()
            .expect("network lock poisoned")
            .remove(peer_id);
    }

    pub fn is_registered(&self, peer_id: &Id160) -> bool {
        self.nodes
            .read()
            .expect("network lock poisoned")
            .contains_key(peer_id)
    }

    fn node_by_id(&self, peer_id: &Id160) -> Option<MemoryNode> {
        self.nodes
            .read()
            .expect("network lock poisoned")
            .get(peer_id)
            .cloned()
    }

    fn listening_node_at(&self, socket: &PeerSocket) -> Option<MemoryNode> {
        self.nodes
            .read()
            .expect("network lock poisoned")
            .values()
            .find(|node| node.listening && node.socket == *socket)
            .cloned()
    }

    /// A wire handle onto this network.
    pub fn wire(self: &Arc<Self>) -> Arc<dyn Wire> {
        Arc::new(MemoryWire {
            network: Arc::clone(self),
        })
    }
}

/// [`Wire`] implementation over a [`MemoryNetwork`].
pub struct MemoryWire {
    network: Arc<MemoryNetwork>,
}

#[async_trait]
impl Wire for MemoryWire {
    async fn call(&self, to: &PeerAddress, message: Message) -> Result<Message, FailReason> {
        if to.relayed {
            let mut last = FailReason::PeerUnreachable;
            for socket in &to.relay_sockets {
                let Some(relay) = self.network.listening_node_at(socket) else {
                    continue;
                };
                match relay.dispatcher.dispatch(message.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(reason) => last = reason,
                }
            }
            return Err(last);
        }
        match self.network.node_by_id(&to.peer_id) {
            Some(node) if node.listening => node.dispatcher.dispatch(message).await,
            _ => Err(FailReason::PeerUnreachable),
        }
    }

    async fn open_connection(
        &self,
        peer: &PeerAddress,
    ) -> Result<Arc<dyn PeerChannel>, FailReason> {
        if !self.network.is_registered(&peer.peer_id) {
            return Err(FailReason::PeerUnreachable);
        }
        Ok(Arc::new(MemoryChannel {
            network: Arc::clone(&self.network),
            peer_id: peer.peer_id,
            open: AtomicBool::new(true),
        }))
    }
}

/// A long-lived in-memory channel to one peer.
pub struct MemoryChannel {
    network: Arc<MemoryNetwork>,
    peer_id: Id160,
    open: AtomicBool,
}

#[async_trait]
impl PeerChannel for MemoryChannel {
    async fn call(&self, message: Message) -> Result<Message, FailReason> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(FailReason::PeerUnreachable);
        }
        match self.network.node_by_id(&self.peer_id) {
            Some(node) => node.dispatcher.dispatch(message).await,
            None => Err(FailReason::PeerUnreachable),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.network.is_registered(&self.peer_id)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
