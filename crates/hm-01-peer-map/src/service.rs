//! Concurrent wrapper around the peer map.
//!
//! One reader-writer lock guards bucket mutations; closest-set queries take
//! the read side. Listener callbacks fire after the lock is dropped so a
//! subscriber can query the map from its callback.

use std::sync::{Arc, RwLock};

use shared_types::{Id160, PeerAddress, TimeSource};
use tracing::debug;

use crate::domain::{
    AddOutcome, FailureKind, FailureOutcome, MaintenanceReport, PeerMap, PeerMapConfig,
    PeerMapError, PeerMapStats, RemoveReason,
};
use crate::ports::PeerMapListener;

/// Shared, listener-notifying peer map handle.
pub struct PeerMapService {
    map: RwLock<PeerMap>,
    listeners: RwLock<Vec<Arc<dyn PeerMapListener>>>,
    time: Arc<dyn TimeSource>,
}

impl PeerMapService {
    pub fn new(self_id: Id160, config: PeerMapConfig, time: Arc<dyn TimeSource>) -> Self {
        Self {
            map: RwLock::new(PeerMap::new(self_id, config)),
            listeners: RwLock::new(Vec::new()),
            time,
        }
    }

    pub fn self_id(&self) -> Id160 {
        *self.map.read().expect("peer map lock poisoned").self_id()
    }

    pub fn add_listener(&self, listener: Arc<dyn PeerMapListener>) {
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .push(listener);
    }

    fn snapshot_listeners(&self) -> Vec<Arc<dyn PeerMapListener>> {
        self.listeners
            .read()
            .expect("listener lock poisoned")
            .clone()
    }

    /// Insert or refresh a peer and notify listeners of the outcome.
    pub fn add(&self, address: PeerAddress, verified: bool) -> Result<AddOutcome, PeerMapError> {
        let now = self.time.now();
        let outcome = {
            let mut map = self.map.write().expect("peer map lock poisoned");
            map.add(address.clone(), verified, now)?
        };
        match outcome {
            AddOutcome::Inserted => {
                debug!(peer = ?address.peer_id, verified, "peer inserted");
                for listener in self.snapshot_listeners() {
                    listener.peer_inserted(&address, verified);
                }
            }
            AddOutcome::Replaced => {
                for listener in self.snapshot_listeners() {
                    listener.peer_updated(&address);
                }
            }
            AddOutcome::Rejected => {
                debug!(peer = ?address.peer_id, "verified bag full, peer kept in overflow");
            }
        }
        Ok(outcome)
    }

    /// Remove a peer and notify listeners.
    pub fn remove(&self, peer_id: &Id160, reason: RemoveReason) -> Option<PeerAddress> {
        let removed = {
            let mut map = self.map.write().expect("peer map lock poisoned");
            map.remove(peer_id, reason)
        };
        if let Some(address) = &removed {
            debug!(peer = ?peer_id, ?reason, "peer removed");
            for listener in self.snapshot_listeners() {
                listener.peer_removed(address, reason);
            }
        }
        removed
    }

    /// Report a failed contact; removal after repeated offline reports is
    /// surfaced to listeners like an explicit removal.
    pub fn report_failure(&self, peer_id: &Id160, kind: FailureKind) -> FailureOutcome {
        let now = self.time.now();
        let outcome = {
            let mut map = self.map.write().expect("peer map lock poisoned");
            map.report_failure(peer_id, kind, now)
        };
        if let FailureOutcome::Removed(address) = &outcome {
            debug!(peer = ?peer_id, "peer removed after repeated offline reports");
            for listener in self.snapshot_listeners() {
                listener.peer_removed(address, RemoveReason::NotReachable);
            }
        }
        outcome
    }

    /// Record a successful contact.
    pub fn touch(&self, peer_id: &Id160) -> bool {
        let now = self.time.now();
        let touched = {
            let mut map = self.map.write().expect("peer map lock poisoned");
            map.touch(peer_id, now)
        };
        if touched {
            if let Some(address) = self.get(peer_id) {
                for listener in self.snapshot_listeners() {
                    listener.peer_updated(&address);
                }
            }
        }
        touched
    }

    pub fn closest_peers(&self, target: &Id160, k: usize) -> Vec<PeerAddress> {
        self.map
            .read()
            .expect("peer map lock poisoned")
            .closest_peers(target, k)
    }

    pub fn contains_verified(&self, peer_id: &Id160) -> bool {
        self.map
            .read()
            .expect("peer map lock poisoned")
            .contains_verified(peer_id)
    }

    pub fn get(&self, peer_id: &Id160) -> Option<PeerAddress> {
        self.map.read().expect("peer map lock poisoned").get(peer_id)
    }

    pub fn all(&self) -> Vec<PeerAddress> {
        self.map.read().expect("peer map lock poisoned").all()
    }

    pub fn all_overflow(&self) -> Vec<PeerAddress> {
        self.map.read().expect("peer map lock poisoned").all_overflow()
    }

    pub fn sample(&self, count: usize) -> Vec<PeerAddress> {
        let mut rng = rand::thread_rng();
        self.map
            .read()
            .expect("peer map lock poisoned")
            .sample(count, &mut rng)
    }

    pub fn stats(&self) -> PeerMapStats {
        let now = self.time.now();
        self.map.read().expect("peer map lock poisoned").stats(now)
    }

    /// Run one maintenance pass; expired overflow entries are reported to
    /// listeners as removals.
    pub fn maintenance(&self) -> MaintenanceReport {
        let now = self.time.now();
        let report = {
            let mut map = self.map.write().expect("peer map lock poisoned");
            map.maintenance(now)
        };
        for address in &report.expired_overflow {
            for listener in self.snapshot_listeners() {
                listener.peer_removed(address, RemoveReason::NotReachable);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{FixedTimeSource, PeerSocket};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener {
        inserted: AtomicUsize,
        removed: AtomicUsize,
        updated: AtomicUsize,
    }

    impl PeerMapListener for CountingListener {
        fn peer_inserted(&self, _address: &PeerAddress, _verified: bool) {
            self.inserted.fetch_add(1, Ordering::SeqCst);
        }
        fn peer_removed(&self, _address: &PeerAddress, _reason: RemoveReason) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
        fn peer_updated(&self, _address: &PeerAddress) {
            self.updated.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn service() -> PeerMapService {
        PeerMapService::new(
            Id160::ZERO,
            PeerMapConfig::default(),
            Arc::new(FixedTimeSource::new(1_000)),
        )
    }

    fn addr(value: u8) -> PeerAddress {
        PeerAddress::new(Id160::from_low_u8(value), PeerSocket::localhost(4000))
    }

    #[test]
    fn test_listeners_observe_lifecycle() {
        let service = service();
        let listener = Arc::new(CountingListener::default());
        service.add_listener(listener.clone());

        service.add(addr(1), true).unwrap();
        service.touch(&Id160::from_low_u8(1));
        service.remove(&Id160::from_low_u8(1), RemoveReason::Shutdown);

        assert_eq!(listener.inserted.load(Ordering::SeqCst), 1);
        assert_eq!(listener.updated.load(Ordering::SeqCst), 1);
        assert_eq!(listener.removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_offline_removal_notifies_listeners() {
        let service = service();
        let listener = Arc::new(CountingListener::default());
        service.add_listener(listener.clone());
        service.add(addr(1), true).unwrap();

        for _ in 0..3 {
            service.report_failure(&Id160::from_low_u8(1), FailureKind::Offline);
        }

        assert_eq!(listener.removed.load(Ordering::SeqCst), 1);
        assert!(!service.contains_verified(&Id160::from_low_u8(1)));
    }
}
