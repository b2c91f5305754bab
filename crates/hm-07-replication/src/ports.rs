//! Driven ports of the replication controller.

use async_trait::async_trait;
use shared_types::{Id160, PeerAddress};

/// Pushes locally owned copies of a location to one peer.
///
/// The runtime wires this to the operations layer's direct store path; tests
/// record the calls.
#[async_trait]
pub trait ReplicaSender: Send + Sync {
    /// Returns the number of entries acknowledged by the peer.
    async fn send_copies(&self, location: Id160, peer: &PeerAddress) -> usize;
}
