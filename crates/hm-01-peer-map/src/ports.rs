//! Driven ports of the peer map.

use shared_types::PeerAddress;

use crate::domain::RemoveReason;

/// Observer of peer map mutations.
///
/// The replication controller and the storage layer subscribe to track
/// responsibility changes. Callbacks run synchronously after the map lock is
/// released; implementations must not block for long and must not call back
/// into the map from the same thread re-entrantly expecting fresh state.
pub trait PeerMapListener: Send + Sync {
    /// A peer entered a bag. `verified` distinguishes the bags.
    fn peer_inserted(&self, address: &PeerAddress, verified: bool);

    /// A peer left the map.
    fn peer_removed(&self, address: &PeerAddress, reason: RemoveReason);

    /// An existing peer's entry was refreshed (address, liveness).
    fn peer_updated(&self, address: &PeerAddress);
}
