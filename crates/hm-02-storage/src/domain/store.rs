//! The in-memory storage backend.
//!
//! A `BTreeMap` keyed by the full 640-bit key so range scans follow key
//! prefixes, a secondary `expires_at → keys` index for the TTL sweep, the
//! protection bookkeeping (claimed domains, removed domains) and the
//! responsibility map with its reverse index.
//!
//! The backend is single-threaded by construction; the service layer wraps
//! it in the keyed-lock discipline.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use shared_crypto::PublicKey;
use shared_types::{Id160, Key320, Key640, SimpleBloomFilter, Timestamp};

use crate::domain::config::{ProtectionEnable, StorageConfig};
use crate::domain::entry::DataEntry;
use crate::domain::results::{DigestInfo, RemoveOutcome, StorageResult};

/// In-memory keyspace with TTL and protection state.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<Key640, DataEntry>,
    /// `expires_at` (ms) → keys dying at that instant.
    timeouts: BTreeMap<u64, BTreeSet<Key640>>,
    /// Domains bound to the first claiming key.
    protected_domains: HashMap<Key320, PublicKey>,
    /// Explicitly removed domains: unprotectable, globally writable.
    removed_domains: HashSet<Key320>,
    /// location → peers responsible for it.
    responsibility: HashMap<Id160, HashSet<Id160>>,
    /// peer → locations it is responsible for.
    reverse_responsibility: HashMap<Id160, HashSet<Id160>>,
    config: StorageConfig,
}

impl MemoryStore {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // =========================================================================
    // Protection checks
    // =========================================================================

    /// Does `public_key` satisfy the domain binding of `key`?
    fn domain_write_allowed(&self, key: &Key640, public_key: Option<&PublicKey>) -> bool {
        let k320 = key.key320();
        if self.removed_domains.contains(&k320) {
            return true;
        }
        match self.protected_domains.get(&k320) {
            None => true,
            Some(owner) => match public_key {
                // The binding key itself, or a master key hashing onto the
                // domain coordinate.
                Some(pk) => pk == owner || pk.key_hash() == key.domain,
                None => false,
            },
        }
    }

    /// Does `public_key` satisfy the protection of an existing entry?
    fn entry_write_allowed(&self, key: &Key640, public_key: Option<&PublicKey>) -> bool {
        let Some(existing) = self.entries.get(key) else {
            return true;
        };
        if !existing.protected_entry || self.removed_domains.contains(&key.key320()) {
            return true;
        }
        match (&existing.public_key, public_key) {
            // A protected entry without a recorded key cannot be enforced.
            (None, _) => true,
            (Some(owner), Some(pk)) => pk == owner || pk.key_hash() == key.content,
            (Some(_), None) => false,
        }
    }

    /// May the writer set the per-entry protection bit?
    fn may_protect_entry(&self, key: &Key640, public_key: Option<&PublicKey>) -> bool {
        match self.config.entry_protection {
            ProtectionEnable::All => public_key.is_some(),
            ProtectionEnable::None => public_key
                .map(|pk| pk.key_hash() == key.content)
                .unwrap_or(false),
        }
    }

    /// Walk the `based_on` chain inside the `(location, domain, content)`
    /// triple. True when the chain loops back onto the new version or onto
    /// itself, or exceeds the configured walk budget.
    fn version_chain_conflicts(&self, key: &Key640, based_on: Id160) -> bool {
        let mut visited = HashSet::new();
        let mut cursor = based_on;
        for _ in 0..self.config.max_version_walk {
            if cursor == key.version || !visited.insert(cursor) {
                return true;
            }
            let ancestor_key =
                Key640::new(key.location, key.domain, key.content, cursor);
            match self.entries.get(&ancestor_key).and_then(|e| e.based_on) {
                Some(next) => cursor = next,
                // A missing or root ancestor ends the chain cleanly; an
                // ancestor may legitimately have expired already.
                None => return false,
            }
        }
        true
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store an entry under `key`.
    pub fn put(
        &mut self,
        key: Key640,
        mut entry: DataEntry,
        public_key: Option<&PublicKey>,
        put_if_absent: bool,
        claim_domain: bool,
        now: Timestamp,
    ) -> StorageResult {
        if !self.domain_write_allowed(&key, public_key) {
            return StorageResult::FailedSecurity;
        }

        let k320 = key.key320();
        if claim_domain
            && !self.removed_domains.contains(&k320)
            && !self.protected_domains.contains_key(&k320)
        {
            let Some(pk) = public_key else {
                return StorageResult::Failed;
            };
            let allowed = match self.config.domain_protection {
                ProtectionEnable::All => true,
                ProtectionEnable::None => pk.key_hash() == key.domain,
            };
            if !allowed {
                return StorageResult::FailedSecurity;
            }
            self.protected_domains.insert(k320, pk.clone());
        }

        if put_if_absent {
            if let Some(existing) = self.entries.get(&key) {
                if !existing.is_expired(now) {
                    return StorageResult::FailedNotAbsent;
                }
            }
        }

        if !self.entry_write_allowed(&key, public_key) {
            return StorageResult::FailedSecurity;
        }

        if entry.protected_entry {
            let effective_key = entry.public_key.as_ref().or(public_key);
            if !self.may_protect_entry(&key, effective_key) {
                return StorageResult::FailedSecurity;
            }
            // Record the protecting key on the entry so later writers are
            // checked against it.
            if entry.public_key.is_none() {
                entry.public_key = public_key.cloned();
            }
        }

        if let Some(based_on) = entry.based_on {
            if self.version_chain_conflicts(&key, based_on) {
                return StorageResult::VersionConflict;
            }
        }

        entry.valid_from = now;
        let new_deadline = entry.expires_at();
        if let Some(old) = self.entries.insert(key, entry) {
            self.unindex_timeout(&key, &old);
        }
        if let Some(deadline) = new_deadline {
            self.timeouts
                .entry(deadline.as_millis())
                .or_default()
                .insert(key);
        }
        StorageResult::Ok
    }

    /// Remove one entry, honoring domain and entry protection.
    pub fn remove(
        &mut self,
        key: Key640,
        public_key: Option<&PublicKey>,
        now: Timestamp,
    ) -> RemoveOutcome {
        if !self.domain_write_allowed(&key, public_key)
            || !self.entry_write_allowed(&key, public_key)
        {
            return RemoveOutcome::Denied;
        }
        match self.entries.remove(&key) {
            Some(entry) => {
                self.unindex_timeout(&key, &entry);
                if entry.is_expired(now) {
                    RemoveOutcome::NotFound
                } else {
                    RemoveOutcome::Removed(Box::new(entry))
                }
            }
            None => RemoveOutcome::NotFound,
        }
    }

    /// Remove every entry in `from..=to` the key is allowed to touch.
    /// Protected entries the key cannot satisfy stay put.
    pub fn remove_range(
        &mut self,
        from: Key640,
        to: Key640,
        public_key: Option<&PublicKey>,
        now: Timestamp,
    ) -> BTreeMap<Key640, DataEntry> {
        let candidates: Vec<Key640> = self
            .entries
            .range(from..=to)
            .map(|(key, _)| *key)
            .collect();
        let mut removed = BTreeMap::new();
        for key in candidates {
            if let RemoveOutcome::Removed(entry) = self.remove(key, public_key, now) {
                removed.insert(key, *entry);
            }
        }
        removed
    }

    /// Explicitly remove a domain: it loses any binding and becomes
    /// unprotectable and globally writable.
    pub fn remove_domain(&mut self, domain: Key320) {
        self.protected_domains.remove(&domain);
        self.removed_domains.insert(domain);
    }

    fn unindex_timeout(&mut self, key: &Key640, entry: &DataEntry) {
        if let Some(deadline) = entry.expires_at() {
            if let Some(bucket) = self.timeouts.get_mut(&deadline.as_millis()) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.timeouts.remove(&deadline.as_millis());
                }
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Point read; expired entries read as absent.
    pub fn get(&self, key: &Key640, now: Timestamp) -> Option<&DataEntry> {
        self.entries.get(key).filter(|e| !e.is_expired(now))
    }

    /// Range read over `from..=to`, skipping expired entries.
    pub fn get_range(
        &self,
        from: Key640,
        to: Key640,
        now: Timestamp,
    ) -> BTreeMap<Key640, DataEntry> {
        self.entries
            .range(from..=to)
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, e)| (*k, e.clone()))
            .collect()
    }

    /// Range read narrowed by bloom filters: `key_bloom` over content keys,
    /// `content_bloom` over payload hashes.
    pub fn get_range_filtered(
        &self,
        from: Key640,
        to: Key640,
        key_bloom: Option<&SimpleBloomFilter>,
        content_bloom: Option<&SimpleBloomFilter>,
        now: Timestamp,
    ) -> BTreeMap<Key640, DataEntry> {
        self.entries
            .range(from..=to)
            .filter(|(_, e)| !e.is_expired(now))
            .filter(|(k, _)| key_bloom.map(|b| b.contains(&k.content)).unwrap_or(true))
            .filter(|(_, e)| {
                content_bloom
                    .map(|b| b.contains(&e.content_hash()))
                    .unwrap_or(true)
            })
            .map(|(k, e)| (*k, e.clone()))
            .collect()
    }

    // =========================================================================
    // Digests
    // =========================================================================

    pub fn digest_range(&self, from: Key640, to: Key640, now: Timestamp) -> DigestInfo {
        let entries = self
            .entries
            .range(from..=to)
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, e)| (*k, e.content_hash()))
            .collect();
        DigestInfo { entries }
    }

    pub fn digest_filtered(
        &self,
        branch: Key320,
        key_bloom: Option<&SimpleBloomFilter>,
        content_bloom: Option<&SimpleBloomFilter>,
        now: Timestamp,
    ) -> DigestInfo {
        let entries = self
            .entries
            .range(branch.range_start()..=branch.range_end())
            .filter(|(_, e)| !e.is_expired(now))
            .filter(|(k, _)| key_bloom.map(|b| b.contains(&k.content)).unwrap_or(true))
            .filter(|(_, e)| {
                content_bloom
                    .map(|b| b.contains(&e.content_hash()))
                    .unwrap_or(true)
            })
            .map(|(k, e)| (*k, e.content_hash()))
            .collect();
        DigestInfo { entries }
    }

    pub fn digest_keys(&self, keys: &[Key640], now: Timestamp) -> DigestInfo {
        let entries = keys
            .iter()
            .filter_map(|k| self.get(k, now).map(|e| (*k, e.content_hash())))
            .collect();
        DigestInfo { entries }
    }

    // =========================================================================
    // TTL sweep
    // =========================================================================

    /// Drop every entry whose deadline is at or before `now`. Returns the
    /// removed keys.
    pub fn check_timeouts(&mut self, now: Timestamp) -> Vec<Key640> {
        let due: Vec<u64> = self
            .timeouts
            .range(..=now.as_millis())
            .map(|(deadline, _)| *deadline)
            .collect();
        let mut removed = Vec::new();
        for deadline in due {
            if let Some(keys) = self.timeouts.remove(&deadline) {
                for key in keys {
                    if self.entries.remove(&key).is_some() {
                        removed.push(key);
                    }
                }
            }
        }
        removed
    }

    // =========================================================================
    // Responsibility map
    // =========================================================================

    /// Record that `peer` is responsible for `location`. True if new.
    pub fn add_responsibility(&mut self, location: Id160, peer: Id160) -> bool {
        let added = self
            .responsibility
            .entry(location)
            .or_default()
            .insert(peer);
        if added {
            self.reverse_responsibility
                .entry(peer)
                .or_default()
                .insert(location);
        }
        added
    }

    /// Drop a location from the responsibility map entirely.
    pub fn remove_responsibility(&mut self, location: &Id160) {
        if let Some(peers) = self.responsibility.remove(location) {
            for peer in peers {
                if let Some(locations) = self.reverse_responsibility.get_mut(&peer) {
                    locations.remove(location);
                    if locations.is_empty() {
                        self.reverse_responsibility.remove(&peer);
                    }
                }
            }
        }
    }

    /// Drop one peer everywhere; returns the locations it was tracked for.
    pub fn remove_responsible_peer(&mut self, peer: &Id160) -> Vec<Id160> {
        let locations: Vec<Id160> = self
            .reverse_responsibility
            .remove(peer)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for location in &locations {
            if let Some(peers) = self.responsibility.get_mut(location) {
                peers.remove(peer);
                if peers.is_empty() {
                    self.responsibility.remove(location);
                }
            }
        }
        locations
    }

    /// Locations `peer` is currently responsible for.
    pub fn find_content_for_responsible_peer(&self, peer: &Id160) -> Vec<Id160> {
        self.reverse_responsibility
            .get(peer)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Peers tracked as responsible for `location`.
    pub fn responsible_peers(&self, location: &Id160) -> Vec<Id160> {
        self.responsibility
            .get(location)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every location with at least one stored entry, deduplicated.
    pub fn stored_locations(&self) -> Vec<Id160> {
        let mut locations: Vec<Id160> = self.entries.keys().map(|k| k.location).collect();
        locations.dedup();
        locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::test_utils::TestKeyPair;

    fn key(l: u8, d: u8, c: u8, v: u8) -> Key640 {
        Key640::new(
            Id160::from_low_u8(l),
            Id160::from_low_u8(d),
            Id160::from_low_u8(c),
            Id160::from_low_u8(v),
        )
    }

    fn now() -> Timestamp {
        Timestamp::from_millis(1_000)
    }

    fn store() -> MemoryStore {
        MemoryStore::new(StorageConfig::default())
    }

    // =========================================================================
    // Basic put/get
    // =========================================================================

    #[test]
    fn test_put_then_get_returns_entry() {
        let mut store = store();
        let result = store.put(
            key(1, 0, 0, 0),
            DataEntry::new(b"red".to_vec()),
            None,
            false,
            false,
            now(),
        );
        assert_eq!(result, StorageResult::Ok);
        let got = store.get(&key(1, 0, 0, 0), now()).expect("entry stored");
        assert_eq!(got.payload(), b"red");
        assert_eq!(got.valid_from, now(), "arrival time stamped on put");
    }

    #[test]
    fn test_put_if_absent_fails_on_live_entry() {
        let mut store = store();
        store.put(key(1, 0, 0, 0), DataEntry::new(vec![1]), None, false, false, now());
        let result = store.put(
            key(1, 0, 0, 0),
            DataEntry::new(vec![2]),
            None,
            true,
            false,
            now(),
        );
        assert_eq!(result, StorageResult::FailedNotAbsent);
    }

    #[test]
    fn test_put_if_absent_succeeds_over_expired_entry() {
        let mut store = store();
        store.put(
            key(1, 0, 0, 0),
            DataEntry::new(vec![1]).with_ttl(1),
            None,
            false,
            false,
            now(),
        );
        let later = now().add_secs(5);
        let result = store.put(
            key(1, 0, 0, 0),
            DataEntry::new(vec![2]),
            None,
            true,
            false,
            later,
        );
        assert_eq!(result, StorageResult::Ok);
    }

    // =========================================================================
    // TTL
    // =========================================================================

    #[test]
    fn test_expired_entry_reads_as_absent() {
        let mut store = store();
        store.put(
            key(1, 0, 0, 0),
            DataEntry::new(vec![1]).with_ttl(1),
            None,
            false,
            false,
            now(),
        );
        assert!(store.get(&key(1, 0, 0, 0), now()).is_some());
        assert!(store.get(&key(1, 0, 0, 0), now().add_secs(2)).is_none());
    }

    #[test]
    fn test_check_timeouts_removes_expired() {
        let mut store = store();
        store.put(
            key(1, 0, 0, 0),
            DataEntry::new(vec![1]).with_ttl(1),
            None,
            false,
            false,
            now(),
        );
        store.put(key(2, 0, 0, 0), DataEntry::new(vec![2]), None, false, false, now());

        let removed = store.check_timeouts(now().add_secs(2));
        assert_eq!(removed, vec![key(1, 0, 0, 0)]);
        assert_eq!(store.len(), 1, "immortal entry survives the sweep");
    }

    #[test]
    fn test_replacing_entry_reindexes_timeout() {
        let mut store = store();
        store.put(
            key(1, 0, 0, 0),
            DataEntry::new(vec![1]).with_ttl(1),
            None,
            false,
            false,
            now(),
        );
        // Replace with an immortal entry before expiry.
        store.put(key(1, 0, 0, 0), DataEntry::new(vec![2]), None, false, false, now());

        let removed = store.check_timeouts(now().add_secs(10));
        assert!(removed.is_empty(), "stale index entry must not kill the replacement");
        assert!(store.get(&key(1, 0, 0, 0), now().add_secs(10)).is_some());
    }

    // =========================================================================
    // Domain protection
    // =========================================================================

    #[test]
    fn test_claimed_domain_rejects_other_keys() {
        let mut store = store();
        let alice = TestKeyPair::from_low_u8(1);
        let bob = TestKeyPair::from_low_u8(2);

        let result = store.put(
            key(1, 7, 0, 0),
            DataEntry::new(vec![1]),
            Some(alice.public_key()),
            false,
            true,
            now(),
        );
        assert_eq!(result, StorageResult::Ok);

        let result = store.put(
            key(1, 7, 9, 0),
            DataEntry::new(vec![2]),
            Some(bob.public_key()),
            false,
            true,
            now(),
        );
        assert_eq!(result, StorageResult::FailedSecurity);

        // The owner may keep writing.
        let result = store.put(
            key(1, 7, 9, 0),
            DataEntry::new(vec![3]),
            Some(alice.public_key()),
            false,
            false,
            now(),
        );
        assert_eq!(result, StorageResult::Ok);
    }

    #[test]
    fn test_master_key_overrides_domain_binding() {
        let mut store = store();
        let alice = TestKeyPair::from_low_u8(1);
        let master = TestKeyPair::from_low_u8(3);
        // Bind the domain coordinate to the master key's hash so the master
        // override applies.
        let domain = master.public_key().key_hash();
        let k = Key640::new(Id160::from_low_u8(1), domain, Id160::ZERO, Id160::ZERO);

        store.put(
            k,
            DataEntry::new(vec![1]),
            Some(alice.public_key()),
            false,
            true,
            now(),
        );
        let result = store.put(
            k,
            DataEntry::new(vec![2]),
            Some(master.public_key()),
            false,
            false,
            now(),
        );
        assert_eq!(result, StorageResult::Ok, "SHA-1(key) == domain overrides");
    }

    #[test]
    fn test_removed_domain_is_globally_writable() {
        let mut store = store();
        let alice = TestKeyPair::from_low_u8(1);
        let bob = TestKeyPair::from_low_u8(2);

        store.put(
            key(1, 7, 0, 0),
            DataEntry::new(vec![1]),
            Some(alice.public_key()),
            false,
            true,
            now(),
        );
        store.remove_domain(key(1, 7, 0, 0).key320());

        let result = store.put(
            key(1, 7, 0, 0),
            DataEntry::new(vec![2]),
            Some(bob.public_key()),
            false,
            true,
            now(),
        );
        assert_eq!(result, StorageResult::Ok, "removed domain accepts any writer");
    }

    #[test]
    fn test_restrictive_domain_protection_requires_identity_key() {
        let mut store = MemoryStore::new(StorageConfig {
            domain_protection: ProtectionEnable::None,
            ..StorageConfig::default()
        });
        let alice = TestKeyPair::from_low_u8(1);

        let result = store.put(
            key(1, 7, 0, 0),
            DataEntry::new(vec![1]),
            Some(alice.public_key()),
            false,
            true,
            now(),
        );
        assert_eq!(
            result,
            StorageResult::FailedSecurity,
            "claiming requires SHA-1(key) == domain under ProtectionEnable::None"
        );

        let domain = alice.public_key().key_hash();
        let k = Key640::new(Id160::from_low_u8(1), domain, Id160::ZERO, Id160::ZERO);
        let result = store.put(
            k,
            DataEntry::new(vec![1]),
            Some(alice.public_key()),
            false,
            true,
            now(),
        );
        assert_eq!(result, StorageResult::Ok);
    }

    // =========================================================================
    // Entry protection
    // =========================================================================

    #[test]
    fn test_protected_entry_rejects_other_keys() {
        let mut store = store();
        let alice = TestKeyPair::from_low_u8(1);
        let bob = TestKeyPair::from_low_u8(2);

        store.put(
            key(1, 0, 5, 0),
            DataEntry::new(vec![1]).protected(),
            Some(alice.public_key()),
            false,
            false,
            now(),
        );

        let result = store.put(
            key(1, 0, 5, 0),
            DataEntry::new(vec![2]),
            Some(bob.public_key()),
            false,
            false,
            now(),
        );
        assert_eq!(result, StorageResult::FailedSecurity);

        let result = store.put(
            key(1, 0, 5, 0),
            DataEntry::new(vec![3]),
            Some(alice.public_key()),
            false,
            false,
            now(),
        );
        assert_eq!(result, StorageResult::Ok);
    }

    #[test]
    fn test_protecting_an_entry_requires_a_key() {
        let mut store = store();
        let result = store.put(
            key(1, 0, 5, 0),
            DataEntry::new(vec![1]).protected(),
            None,
            false,
            false,
            now(),
        );
        assert_eq!(result, StorageResult::FailedSecurity);
    }

    // =========================================================================
    // Version ancestry
    // =========================================================================

    #[test]
    fn test_version_chain_accepts_linear_history() {
        let mut store = store();
        store.put(key(1, 0, 0, 1), DataEntry::new(vec![1]), None, false, false, now());
        let result = store.put(
            key(1, 0, 0, 2),
            DataEntry::new(vec![2]).with_based_on(Id160::from_low_u8(1)),
            None,
            false,
            false,
            now(),
        );
        assert_eq!(result, StorageResult::Ok);
    }

    #[test]
    fn test_version_cycle_is_rejected() {
        let mut store = store();
        // v2 based on v1.
        store.put(
            key(1, 0, 0, 2),
            DataEntry::new(vec![2]).with_based_on(Id160::from_low_u8(1)),
            None,
            false,
            false,
            now(),
        );
        // v1 based on v2 would close the loop.
        let result = store.put(
            key(1, 0, 0, 1),
            DataEntry::new(vec![1]).with_based_on(Id160::from_low_u8(2)),
            None,
            false,
            false,
            now(),
        );
        assert_eq!(result, StorageResult::VersionConflict);
    }

    #[test]
    fn test_self_referencing_version_is_rejected() {
        let mut store = store();
        let result = store.put(
            key(1, 0, 0, 1),
            DataEntry::new(vec![1]).with_based_on(Id160::from_low_u8(1)),
            None,
            false,
            false,
            now(),
        );
        assert_eq!(result, StorageResult::VersionConflict);
    }

    // =========================================================================
    // Ranges and digests
    // =========================================================================

    #[test]
    fn test_get_range_shares_location_prefix() {
        let mut store = store();
        store.put(key(1, 0, 0, 0), DataEntry::new(vec![1]), None, false, false, now());
        store.put(key(1, 0, 1, 0), DataEntry::new(vec![2]), None, false, false, now());
        store.put(key(2, 0, 0, 0), DataEntry::new(vec![3]), None, false, false, now());

        let (from, to) = Key640::location_range(Id160::from_low_u8(1));
        let range = store.get_range(from, to, now());
        assert_eq!(range.len(), 2);
    }

    #[test]
    fn test_bloom_filtered_range() {
        let mut store = store();
        store.put(key(1, 0, 3, 0), DataEntry::new(vec![1]), None, false, false, now());
        store.put(key(1, 0, 4, 0), DataEntry::new(vec![2]), None, false, false, now());

        let mut bloom = SimpleBloomFilter::with_capacity(10, 0.01);
        bloom.insert(&Id160::from_low_u8(3));

        let (from, to) = Key640::location_range(Id160::from_low_u8(1));
        let range = store.get_range_filtered(from, to, Some(&bloom), None, now());
        assert_eq!(range.len(), 1);
        assert!(range.contains_key(&key(1, 0, 3, 0)));
    }

    #[test]
    fn test_digest_matches_contents() {
        let mut store = store();
        store.put(key(1, 0, 0, 0), DataEntry::new(b"x".to_vec()), None, false, false, now());

        let (from, to) = Key640::location_range(Id160::from_low_u8(1));
        let digest = store.digest_range(from, to, now());
        assert_eq!(digest.len(), 1);
        assert_eq!(
            digest.entries[&key(1, 0, 0, 0)],
            shared_crypto::hash_bytes(b"x")
        );
    }

    // =========================================================================
    // Remove
    // =========================================================================

    #[test]
    fn test_remove_respects_entry_protection() {
        let mut store = store();
        let alice = TestKeyPair::from_low_u8(1);
        let bob = TestKeyPair::from_low_u8(2);
        store.put(
            key(1, 0, 5, 0),
            DataEntry::new(vec![1]).protected(),
            Some(alice.public_key()),
            false,
            false,
            now(),
        );

        assert_eq!(
            store.remove(key(1, 0, 5, 0), Some(bob.public_key()), now()),
            RemoveOutcome::Denied
        );
        assert!(matches!(
            store.remove(key(1, 0, 5, 0), Some(alice.public_key()), now()),
            RemoveOutcome::Removed(_)
        ));
    }

    #[test]
    fn test_remove_range_skips_denied_entries() {
        let mut store = store();
        let alice = TestKeyPair::from_low_u8(1);
        store.put(key(1, 0, 1, 0), DataEntry::new(vec![1]), None, false, false, now());
        store.put(
            key(1, 0, 2, 0),
            DataEntry::new(vec![2]).protected(),
            Some(alice.public_key()),
            false,
            false,
            now(),
        );

        let (from, to) = Key640::location_range(Id160::from_low_u8(1));
        let removed = store.remove_range(from, to, None, now());

        assert_eq!(removed.len(), 1);
        assert!(store.get(&key(1, 0, 2, 0), now()).is_some(), "protected entry stays");
    }

    // =========================================================================
    // Responsibility
    // =========================================================================

    #[test]
    fn test_responsibility_forward_and_reverse_stay_in_sync() {
        let mut store = store();
        let loc = Id160::from_low_u8(1);
        let peer = Id160::from_low_u8(9);

        assert!(store.add_responsibility(loc, peer));
        assert!(!store.add_responsibility(loc, peer), "duplicate is a no-op");
        assert_eq!(store.find_content_for_responsible_peer(&peer), vec![loc]);
        assert_eq!(store.responsible_peers(&loc), vec![peer]);

        store.remove_responsibility(&loc);
        assert!(store.find_content_for_responsible_peer(&peer).is_empty());
    }

    #[test]
    fn test_remove_responsible_peer_reports_locations() {
        let mut store = store();
        let peer = Id160::from_low_u8(9);
        store.add_responsibility(Id160::from_low_u8(1), peer);
        store.add_responsibility(Id160::from_low_u8(2), peer);

        let mut locations = store.remove_responsible_peer(&peer);
        locations.sort();
        assert_eq!(locations, vec![Id160::from_low_u8(1), Id160::from_low_u8(2)]);
        assert!(store.responsible_peers(&Id160::from_low_u8(1)).is_empty());
    }
}
