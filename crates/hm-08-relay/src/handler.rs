//! The RELAY RPC handler.
//!
//! Every listening peer can serve as a relay: a SETUP request installs a
//! forwarder for the requesting peer. On the unreachable side, the same
//! handler unwraps FORWARD wrappers arriving over the long-lived channel and
//! re-dispatches the inner request locally.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use hm_01_peer_map::PeerMapService;
use hm_04_rpc::{
    decode_from_slice, encode_to_vec, Dispatcher, FailReason, Message, MessageBody,
    RequestSender, RpcHandler, Wire,
};
use tracing::debug;

use crate::config::RelayConfig;
use crate::forwarder::RelayForwarder;

pub struct RelayRpcHandler {
    /// Weak: the dispatcher owns this handler.
    pub dispatcher: Weak<Dispatcher>,
    pub peer_map: Arc<PeerMapService>,
    pub sender: Arc<RequestSender>,
    pub wire: Arc<dyn Wire>,
    pub config: RelayConfig,
}

impl RelayRpcHandler {
    async fn handle_setup(&self, message: &Message) -> Result<Message, FailReason> {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return Err(FailReason::Shutdown);
        };
        // The setup request rode in on the connection the client opened;
        // keep that connection as the forwarding channel.
        let channel = self.wire.open_connection(&message.sender).await?;
        let relayed_peer = message
            .sender
            .clone()
            .with_relays(vec![self.sender.self_address().socket]);
        debug!(client = ?relayed_peer.peer_id, "relay setup accepted");
        dispatcher.register_forwarder(
            message.sender.peer_id,
            Arc::new(RelayForwarder {
                relayed_peer,
                peer_map: Arc::clone(&self.peer_map),
                channel,
                relay_address: self.sender.self_address(),
                neighbors_k: self.config.neighbors_k,
            }),
        );
        Ok(message.ok_response(self.sender.self_address(), MessageBody::Empty))
    }

    async fn handle_forward(&self, message: &Message, inner: &[u8]) -> Result<Message, FailReason> {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return Err(FailReason::Shutdown);
        };
        let inner_message =
            decode_from_slice(inner).map_err(|e| FailReason::ProtocolViolation(e.to_string()))?;
        let inner_response = dispatcher.dispatch(inner_message).await?;
        Ok(message.ok_response(
            self.sender.self_address(),
            MessageBody::RelayReply {
                inner: encode_to_vec(&inner_response),
            },
        ))
    }
}

#[async_trait]
impl RpcHandler for RelayRpcHandler {
    async fn handle(&self, message: Message) -> Result<Message, FailReason> {
        match &message.body {
            MessageBody::RelaySetup => self.handle_setup(&message).await,
            MessageBody::RelayForward { inner } => {
                let inner = inner.clone();
                self.handle_forward(&message, &inner).await
            }
            _ => Err(FailReason::ProtocolViolation(
                "relay request without sub-command".into(),
            )),
        }
    }
}
