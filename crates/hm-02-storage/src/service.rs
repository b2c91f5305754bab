//! The storage service: keyed locking around the in-memory backend.
//!
//! Every operation first acquires its lock footprint (a suspension point),
//! then runs the backend mutation inside a short internal mutex section.
//! Writes to one 640-bit key are linearizable through the point lock; range
//! operations hold their whole branch.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use shared_crypto::PublicKey;
use shared_types::{
    Id160, Key320, Key640, LockFootprint, SimpleBloomFilter, TimeSource, Timestamp,
};
use tracing::{debug, trace};

use crate::domain::{
    DataEntry, DigestInfo, MemoryStore, RemoveOutcome, StorageConfig, StorageResult,
};
use crate::locks::StorageLocks;

/// Concurrent storage handle.
pub struct StorageLayer {
    store: Mutex<MemoryStore>,
    locks: StorageLocks,
    time: Arc<dyn TimeSource>,
}

impl StorageLayer {
    pub fn new(config: StorageConfig, time: Arc<dyn TimeSource>) -> Self {
        Self {
            store: Mutex::new(MemoryStore::new(config)),
            locks: StorageLocks::new(),
            time,
        }
    }

    fn now(&self) -> Timestamp {
        self.time.now()
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut MemoryStore) -> T) -> T {
        let mut store = self.store.lock().expect("storage mutex poisoned");
        f(&mut store)
    }

    // =========================================================================
    // Point operations (640-lock)
    // =========================================================================

    pub async fn put(
        &self,
        key: Key640,
        entry: DataEntry,
        public_key: Option<&PublicKey>,
        put_if_absent: bool,
        claim_domain: bool,
    ) -> StorageResult {
        let _guard = self.locks.acquire(LockFootprint::Exact(key)).await;
        let now = self.now();
        let result =
            self.with_store(|s| s.put(key, entry, public_key, put_if_absent, claim_domain, now));
        trace!(?key, %result, "put");
        result
    }

    pub async fn get(&self, key: Key640) -> Option<DataEntry> {
        let _guard = self.locks.acquire(LockFootprint::Exact(key)).await;
        let now = self.now();
        self.with_store(|s| s.get(&key, now).cloned())
    }

    pub async fn remove(&self, key: Key640, public_key: Option<&PublicKey>) -> RemoveOutcome {
        let _guard = self.locks.acquire(LockFootprint::Exact(key)).await;
        let now = self.now();
        self.with_store(|s| s.remove(key, public_key, now))
    }

    // =========================================================================
    // Range operations (narrowest covering lock)
    // =========================================================================

    pub async fn get_range(
        &self,
        from: Key640,
        to: Key640,
    ) -> std::collections::BTreeMap<Key640, DataEntry> {
        let _guard = self.locks.acquire(LockFootprint::for_range(&from, &to)).await;
        let now = self.now();
        self.with_store(|s| s.get_range(from, to, now))
    }

    pub async fn get_range_filtered(
        &self,
        from: Key640,
        to: Key640,
        key_bloom: Option<&SimpleBloomFilter>,
        content_bloom: Option<&SimpleBloomFilter>,
    ) -> std::collections::BTreeMap<Key640, DataEntry> {
        let _guard = self.locks.acquire(LockFootprint::for_range(&from, &to)).await;
        let now = self.now();
        self.with_store(|s| s.get_range_filtered(from, to, key_bloom, content_bloom, now))
    }

    pub async fn remove_range(
        &self,
        from: Key640,
        to: Key640,
        public_key: Option<&PublicKey>,
    ) -> std::collections::BTreeMap<Key640, DataEntry> {
        let _guard = self.locks.acquire(LockFootprint::for_range(&from, &to)).await;
        let now = self.now();
        self.with_store(|s| s.remove_range(from, to, public_key, now))
    }

    pub async fn digest_range(&self, from: Key640, to: Key640) -> DigestInfo {
        let _guard = self.locks.acquire(LockFootprint::for_range(&from, &to)).await;
        let now = self.now();
        self.with_store(|s| s.digest_range(from, to, now))
    }

    pub async fn digest_filtered(
        &self,
        branch: Key320,
        key_bloom: Option<&SimpleBloomFilter>,
        content_bloom: Option<&SimpleBloomFilter>,
    ) -> DigestInfo {
        let _guard = self.locks.acquire(LockFootprint::Domain(branch)).await;
        let now = self.now();
        self.with_store(|s| s.digest_filtered(branch, key_bloom, content_bloom, now))
    }

    pub async fn digest_keys(&self, keys: &[Key640]) -> DigestInfo {
        // Point digests take no range lock; each lookup is a single read.
        let now = self.now();
        self.with_store(|s| s.digest_keys(keys, now))
    }

    pub async fn remove_domain(&self, domain: Key320) {
        let _guard = self.locks.acquire(LockFootprint::Domain(domain)).await;
        self.with_store(|s| s.remove_domain(domain));
    }

    // =========================================================================
    // TTL sweep
    // =========================================================================

    /// Remove everything whose deadline passed. Returns the removed keys.
    pub async fn check_timeouts(&self) -> Vec<Key640> {
        let _guard = self.locks.acquire(LockFootprint::Global).await;
        let now = self.now();
        let removed = self.with_store(|s| s.check_timeouts(now));
        if !removed.is_empty() {
            debug!(count = removed.len(), "ttl sweep removed expired entries");
        }
        removed
    }

    /// Spawn the periodic TTL sweeper. The task runs until aborted.
    pub fn spawn_ttl_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let storage = Arc::clone(self);
        let period = Duration::from_millis(
            self.with_store(|s| s.config().check_interval_millis).max(1),
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                storage.check_timeouts().await;
            }
        })
    }

    // =========================================================================
    // Responsibility map
    // =========================================================================

    pub fn add_responsibility(&self, location: Id160, peer: Id160) -> bool {
        self.with_store(|s| s.add_responsibility(location, peer))
    }

    pub fn remove_responsibility(&self, location: &Id160) {
        self.with_store(|s| s.remove_responsibility(location));
    }

    pub fn remove_responsible_peer(&self, peer: &Id160) -> Vec<Id160> {
        self.with_store(|s| s.remove_responsible_peer(peer))
    }

    pub fn find_content_for_responsible_peer(&self, peer: &Id160) -> Vec<Id160> {
        self.with_store(|s| s.find_content_for_responsible_peer(peer))
    }

    pub fn responsible_peers(&self, location: &Id160) -> Vec<Id160> {
        self.with_store(|s| s.responsible_peers(location))
    }

    pub fn stored_locations(&self) -> Vec<Id160> {
        self.with_store(|s| s.stored_locations())
    }

    pub fn len(&self) -> usize {
        self.with_store(|s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.with_store(|s| s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::FixedTimeSource;

    fn key(l: u8, v: u8) -> Key640 {
        Key640::new(
            Id160::from_low_u8(l),
            Id160::ZERO,
            Id160::ZERO,
            Id160::from_low_u8(v),
        )
    }

    fn layer_with_clock(millis: u64) -> (Arc<StorageLayer>, Arc<FixedTimeSource>) {
        let clock = Arc::new(FixedTimeSource::new(millis));
        let layer = Arc::new(StorageLayer::new(
            StorageConfig::for_testing(),
            clock.clone(),
        ));
        (layer, clock)
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (layer, _) = layer_with_clock(1_000);
        let result = layer
            .put(key(1, 0), DataEntry::new(b"red".to_vec()), None, false, false)
            .await;
        assert!(result.is_ok());

        let got = layer.get(key(1, 0)).await.expect("stored entry");
        assert_eq!(got.payload(), b"red");
    }

    #[tokio::test]
    async fn test_ttl_expiry_via_sweep() {
        let (layer, clock) = layer_with_clock(1_000);
        layer
            .put(
                key(1, 0),
                DataEntry::new(vec![1]).with_ttl(1),
                None,
                false,
                false,
            )
            .await;

        clock.advance(2_000);
        assert!(layer.get(key(1, 0)).await.is_none(), "expired reads absent");

        let removed = layer.check_timeouts().await;
        assert_eq!(removed, vec![key(1, 0)]);
        assert!(layer.is_empty(), "sweep removed the expired entry");
    }

    #[tokio::test]
    async fn test_concurrent_puts_to_same_key_linearize() {
        let (layer, _) = layer_with_clock(1_000);
        let mut handles = Vec::new();
        for i in 0..8u8 {
            let layer = layer.clone();
            handles.push(tokio::spawn(async move {
                layer
                    .put(key(1, 0), DataEntry::new(vec![i]), None, false, false)
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.expect("task completes").is_ok());
        }
        assert_eq!(layer.len(), 1, "all writers hit the same key");
    }
}
