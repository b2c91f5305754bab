//! The relay-side forwarder.
//!
//! Installed into the relay's dispatcher under the unreachable peer's id.
//! Requests addressed to that id are wrapped and pushed over the long-lived
//! channel the client established; NEIGHBORS requests are answered straight
//! from the relay's own peer map, which acts as the client's map toward
//! iterative routing.

use std::sync::Arc;

use async_trait::async_trait;
use hm_01_peer_map::PeerMapService;
use hm_04_rpc::{
    decode_from_slice, encode_to_vec, Command, FailReason, Forwarder, Message, MessageBody,
    MessageType, PeerChannel,
};
use shared_types::PeerAddress;
use tracing::trace;

pub struct RelayForwarder {
    /// The unreachable peer's relayed address; used as the sender of
    /// on-behalf answers so routing learns how to address it.
    pub relayed_peer: PeerAddress,
    /// The relay's own peer map, answering neighbor queries on behalf.
    pub peer_map: Arc<PeerMapService>,
    /// The connection the unreachable peer keeps open to this relay.
    pub channel: Arc<dyn PeerChannel>,
    /// The relay's own address (sender of the forward wrapper).
    pub relay_address: PeerAddress,
    pub neighbors_k: usize,
}

#[async_trait]
impl Forwarder for RelayForwarder {
    async fn forward(&self, message: Message) -> Result<Message, FailReason> {
        // Routing stops never cross the relay: the relay's neighborhood
        // stands in for the unreachable peer's.
        if message.command == Command::Neighbors && message.is_request() {
            if let MessageBody::NeighborsQuery { target } = &message.body {
                let peers = self.peer_map.closest_peers(target, self.neighbors_k);
                trace!(client = ?self.relayed_peer.peer_id, "answering neighbors on behalf");
                return Ok(message.response(
                    MessageType::Ok,
                    self.relayed_peer.clone(),
                    MessageBody::Neighbors {
                        peers,
                        digest: None,
                    },
                ));
            }
        }

        if !self.channel.is_open() {
            return Err(FailReason::PeerUnreachable);
        }
        let wrapper = Message::request(
            Command::Relay,
            self.relay_address.clone(),
            self.relayed_peer.peer_id,
            MessageBody::RelayForward {
                inner: encode_to_vec(&message),
            },
        );
        let reply = self.channel.call(wrapper).await?;
        match reply.body {
            MessageBody::RelayReply { inner } => decode_from_slice(&inner)
                .map_err(|e| FailReason::ProtocolViolation(e.to_string())),
            _ => Err(FailReason::ProtocolViolation(
                "relay reply without inner message".into(),
            )),
        }
    }
}
