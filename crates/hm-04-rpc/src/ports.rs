//! Driven ports of the RPC layer.
//!
//! The raw transport is an external collaborator: the core only needs a way
//! to exchange request/response pairs with an addressed peer and a way to
//! keep one long-lived channel open (relaying). The workspace ships an
//! in-memory implementation in `adapters`; a UDP/TCP multiplexer slots in
//! behind the same traits.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::FailReason;
use crate::message::Message;
use shared_types::PeerAddress;

/// One established long-lived channel to a specific peer.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Exchange one request/response pair over the channel.
    async fn call(&self, message: Message) -> Result<Message, FailReason>;

    fn is_open(&self) -> bool;

    fn close(&self);
}

/// Message transport to addressed peers.
#[async_trait]
pub trait Wire: Send + Sync {
    /// One-shot request/response exchange with `to`.
    ///
    /// Relayed addresses are routed through one of their relay sockets; the
    /// relay's dispatcher forwards by recipient id.
    async fn call(&self, to: &PeerAddress, message: Message) -> Result<Message, FailReason>;

    /// Open a long-lived channel to `peer`.
    ///
    /// Used by relays to keep the reverse connection an unreachable peer
    /// established during relay setup.
    async fn open_connection(
        &self,
        peer: &PeerAddress,
    ) -> Result<Arc<dyn PeerChannel>, FailReason>;
}
