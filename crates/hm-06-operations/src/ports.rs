//! Driven ports of the operations layer.

use shared_types::PeerAddress;

/// Receiver of opaque SEND-DIRECT payloads.
///
/// The payload is an application concern; the overlay only moves bytes.
pub trait DirectDataHandler: Send + Sync {
    fn receive(&self, from: &PeerAddress, payload: Vec<u8>);
}

/// Receiver of broadcast payloads. Forwarding is handled by the broadcast
/// dispatcher; this port only consumes.
pub trait BroadcastHandler: Send + Sync {
    fn deliver(&self, from: &PeerAddress, payload: &[u8]);
}

/// Default no-op receivers for peers that do not consume either stream.
#[derive(Debug, Default)]
pub struct NoopHandler;

impl DirectDataHandler for NoopHandler {
    fn receive(&self, _from: &PeerAddress, _payload: Vec<u8>) {}
}

impl BroadcastHandler for NoopHandler {
    fn deliver(&self, _from: &PeerAddress, _payload: &[u8]) {}
}
