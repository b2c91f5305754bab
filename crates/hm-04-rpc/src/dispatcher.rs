//! Request dispatch.
//!
//! Incoming messages land here. A message addressed to the local peer goes
//! to the handler registered for its command; a message addressed to someone
//! else goes to the forwarder installed for that destination (the relay
//! hook) or is refused.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use shared_types::Id160;
use tracing::{debug, trace};

use crate::errors::FailReason;
use crate::message::{Command, Message};

/// Server side of one RPC family.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<Message, FailReason>;
}

/// Delivery strategy for messages addressed to another peer.
///
/// Installed per destination id by the relay subsystem.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, message: Message) -> Result<Message, FailReason>;
}

/// Routes incoming messages to handlers and forwarders.
pub struct Dispatcher {
    self_id: Id160,
    handlers: RwLock<HashMap<u8, Arc<dyn RpcHandler>>>,
    forwarders: RwLock<HashMap<Id160, Arc<dyn Forwarder>>>,
    shutdown: AtomicBool,
}

impl Dispatcher {
    pub fn new(self_id: Id160) -> Self {
        Self {
            self_id,
            handlers: RwLock::new(HashMap::new()),
            forwarders: RwLock::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn self_id(&self) -> Id160 {
        self.self_id
    }

    /// Register the handler for a command family. A disabled capability is
    /// simply never registered.
    pub fn register(&self, command: Command, handler: Arc<dyn RpcHandler>) {
        self.handlers
            .write()
            .expect("handler table poisoned")
            .insert(command.code(), handler);
    }

    pub fn is_registered(&self, command: Command) -> bool {
        self.handlers
            .read()
            .expect("handler table poisoned")
            .contains_key(&command.code())
    }

    /// Install a forwarder for messages addressed to `destination`.
    pub fn register_forwarder(&self, destination: Id160, forwarder: Arc<dyn Forwarder>) {
        debug!(dest = ?destination, "forwarder installed");
        self.forwarders
            .write()
            .expect("forwarder table poisoned")
            .insert(destination, forwarder);
    }

    pub fn remove_forwarder(&self, destination: &Id160) {
        self.forwarders
            .write()
            .expect("forwarder table poisoned")
            .remove(destination);
    }

    pub fn has_forwarder(&self, destination: &Id160) -> bool {
        self.forwarders
            .read()
            .expect("forwarder table poisoned")
            .contains_key(destination)
    }

    /// Mark the dispatcher as shutting down; every further dispatch fails
    /// with the shared sentinel.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Deliver one incoming message and produce the response.
    pub async fn dispatch(&self, message: Message) -> Result<Message, FailReason> {
        if self.is_shutdown() {
            return Err(FailReason::Shutdown);
        }
        trace!(command = ?message.command, id = message.message_id, "dispatch");

        if message.recipient != self.self_id {
            let forwarder = self
                .forwarders
                .read()
                .expect("forwarder table poisoned")
                .get(&message.recipient)
                .cloned();
            return match forwarder {
                Some(forwarder) => forwarder.forward(message).await,
                None => Err(FailReason::PeerUnreachable),
            };
        }

        let handler = self
            .handlers
            .read()
            .expect("handler table poisoned")
            .get(&message.command.code())
            .cloned();
        match handler {
            Some(handler) => handler.handle(message).await,
            None => Err(FailReason::ProtocolViolation(format!(
                "no handler for {:?}",
                message.command
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageBody, MessageType};
    use shared_types::{PeerAddress, PeerSocket};

    struct EchoHandler;

    #[async_trait]
    impl RpcHandler for EchoHandler {
        async fn handle(&self, message: Message) -> Result<Message, FailReason> {
            let me = PeerAddress::new(message.recipient, PeerSocket::localhost(1));
            Ok(message.ok_response(me, MessageBody::Empty))
        }
    }

    fn ping_to(recipient: Id160) -> Message {
        Message::request(
            Command::Ping,
            PeerAddress::new(Id160::from_low_u8(1), PeerSocket::localhost(2)),
            recipient,
            MessageBody::Empty,
        )
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_handler() {
        let dispatcher = Dispatcher::new(Id160::from_low_u8(9));
        dispatcher.register(Command::Ping, Arc::new(EchoHandler));

        let response = dispatcher
            .dispatch(ping_to(Id160::from_low_u8(9)))
            .await
            .expect("handler answers");
        assert_eq!(response.message_type, MessageType::Ok);
    }

    #[tokio::test]
    async fn test_unhandled_command_is_a_protocol_violation() {
        let dispatcher = Dispatcher::new(Id160::from_low_u8(9));
        let result = dispatcher.dispatch(ping_to(Id160::from_low_u8(9))).await;
        assert!(matches!(result, Err(FailReason::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_foreign_recipient_without_forwarder_is_unreachable() {
        let dispatcher = Dispatcher::new(Id160::from_low_u8(9));
        dispatcher.register(Command::Ping, Arc::new(EchoHandler));

        let result = dispatcher.dispatch(ping_to(Id160::from_low_u8(5))).await;
        assert_eq!(result.unwrap_err(), FailReason::PeerUnreachable);
    }

    #[tokio::test]
    async fn test_shutdown_fails_dispatch() {
        let dispatcher = Dispatcher::new(Id160::from_low_u8(9));
        dispatcher.register(Command::Ping, Arc::new(EchoHandler));
        dispatcher.shutdown();

        let result = dispatcher.dispatch(ping_to(Id160::from_low_u8(9))).await;
        assert_eq!(result.unwrap_err(), FailReason::Shutdown);
    }
}
