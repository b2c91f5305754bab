//! The bucketed peer map.
//!
//! 160 buckets, one per possible XOR-distance bit length from the local
//! peer. Each bucket holds up to `bag_size` *verified* entries (peers that
//! answered a direct request) and up to `bag_size` *overflow* entries
//! (hearsay from neighbor lists and peer exchange). A peer id appears in at
//! most one bag of one bucket, and the local id is never inserted.

use std::collections::VecDeque;

use shared_types::{cmp_by_distance, Id160, PeerAddress, Timestamp, ID_BITS};

use crate::domain::config::PeerMapConfig;
use crate::domain::errors::PeerMapError;

/// Number of buckets (one per XOR-distance bit length).
pub const NUM_BUCKETS: usize = ID_BITS as usize;

/// Outcome of an `add` call, as seen by the target bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The peer was new to the map and inserted.
    Inserted,
    /// An existing entry with the same id was refreshed or promoted.
    Replaced,
    /// The verified bag was full; verified entries are never evicted for a
    /// newcomer. The peer is retained in the overflow bag as a candidate.
    Rejected,
}

/// Why a peer left the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    /// Repeated offline reports exhausted the allowance.
    NotReachable,
    /// The peer announced a clean shutdown (QUIT).
    Shutdown,
    /// A protocol violation or local error disqualified the peer.
    Exception,
}

/// Kind of failure being reported for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The peer did not answer at all; counts toward removal.
    Offline,
    /// A send failed for a transient reason; counted but never removes.
    Transient,
}

/// Result of reporting a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The failure allowance ran out; the peer was removed.
    Removed(PeerAddress),
    /// The failure was recorded; the peer stays.
    Counted,
    /// The peer is not in the map.
    Unknown,
}

/// One tracked peer with its liveness bookkeeping.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub address: PeerAddress,
    pub last_seen: Timestamp,
    /// Consecutive offline reports; reset by any successful contact.
    pub offline_count: u8,
    /// Total transient send failures; diagnostic only.
    pub transient_failures: u32,
}

impl PeerEntry {
    fn new(address: PeerAddress, now: Timestamp) -> Self {
        Self {
            address,
            last_seen: now,
            offline_count: 0,
            transient_failures: 0,
        }
    }
}

/// One distance bucket: the verified bag plus the FIFO overflow bag.
#[derive(Debug, Clone, Default)]
struct Bucket {
    verified: Vec<PeerEntry>,
    overflow: VecDeque<PeerEntry>,
}

impl Bucket {
    fn find_verified(&self, id: &Id160) -> Option<usize> {
        self.verified.iter().position(|e| &e.address.peer_id == id)
    }

    fn find_overflow(&self, id: &Id160) -> Option<usize> {
        self.overflow.iter().position(|e| &e.address.peer_id == id)
    }
}

/// Snapshot of map health for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerMapStats {
    pub verified_count: usize,
    pub overflow_count: usize,
    pub buckets_in_use: usize,
    pub oldest_verified_age_millis: u64,
}

/// Result of a maintenance pass.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    /// Overflow entries aged out and removed.
    pub expired_overflow: Vec<PeerAddress>,
    /// Stalest verified peers that deserve a liveness ping.
    pub ping_candidates: Vec<PeerAddress>,
}

/// The routing table: who we know, bucketed by XOR distance.
#[derive(Debug)]
pub struct PeerMap {
    self_id: Id160,
    buckets: Vec<Bucket>,
    config: PeerMapConfig,
}

impl PeerMap {
    pub fn new(self_id: Id160, config: PeerMapConfig) -> Self {
        Self {
            self_id,
            buckets: (0..NUM_BUCKETS).map(|_| Bucket::default()).collect(),
            config,
        }
    }

    pub fn self_id(&self) -> &Id160 {
        &self.self_id
    }

    pub fn config(&self) -> &PeerMapConfig {
        &self.config
    }

    /// Bucket index for a peer: `160 - bit_length(self ⊕ peer)`.
    ///
    /// The index is 0 for the most distant half of the space and grows as
    /// leading bits agree. `None` for the local id itself.
    fn bucket_index(&self, peer_id: &Id160) -> Option<usize> {
        let distance = self.self_id.distance(peer_id);
        if distance.is_zero() {
            return None;
        }
        Some((ID_BITS - distance.bit_length()) as usize)
    }

    /// Insert or refresh a peer.
    ///
    /// Verified insertions promote a same-id overflow entry; a full verified
    /// bag never evicts (the newcomer stays in overflow and the call reports
    /// [`AddOutcome::Rejected`]). Unverified insertions land in the overflow
    /// bag, which evicts FIFO when full.
    pub fn add(
        &mut self,
        address: PeerAddress,
        verified: bool,
        now: Timestamp,
    ) -> Result<AddOutcome, PeerMapError> {
        if address.peer_id.is_zero() {
            return Err(PeerMapError::ReservedId);
        }
        let index = self
            .bucket_index(&address.peer_id)
            .ok_or(PeerMapError::SelfInsertion)?;
        let bag_size = self.config.bag_size;
        let bucket = &mut self.buckets[index];

        // Same id already verified: refresh in place, whatever the caller
        // claims about verification.
        if let Some(pos) = bucket.find_verified(&address.peer_id) {
            let entry = &mut bucket.verified[pos];
            entry.address = address;
            entry.last_seen = now;
            entry.offline_count = 0;
            return Ok(AddOutcome::Replaced);
        }

        if verified {
            let promoted = bucket
                .find_overflow(&address.peer_id)
                .and_then(|pos| bucket.overflow.remove(pos));
            if bucket.verified.len() < bag_size {
                bucket.verified.push(PeerEntry::new(address, now));
                return Ok(if promoted.is_some() {
                    AddOutcome::Replaced
                } else {
                    AddOutcome::Inserted
                });
            }
            // Full bag: keep the candidate in overflow so closest-set
            // queries of other peers can still learn about it.
            Self::push_overflow(bucket, address, now, bag_size);
            return Ok(AddOutcome::Rejected);
        }

        if let Some(pos) = bucket.find_overflow(&address.peer_id) {
            let entry = &mut bucket.overflow[pos];
            entry.address = address;
            entry.last_seen = now;
            return Ok(AddOutcome::Replaced);
        }
        Self::push_overflow(bucket, address, now, bag_size);
        Ok(AddOutcome::Inserted)
    }

    fn push_overflow(bucket: &mut Bucket, address: PeerAddress, now: Timestamp, bag_size: usize) {
        if let Some(pos) = bucket.find_overflow(&address.peer_id) {
            bucket.overflow.remove(pos);
        }
        bucket.overflow.push_back(PeerEntry::new(address, now));
        while bucket.overflow.len() > bag_size {
            bucket.overflow.pop_front();
        }
    }

    /// Remove a peer from both bags. Returns its address if it was known.
    pub fn remove(&mut self, peer_id: &Id160, _reason: RemoveReason) -> Option<PeerAddress> {
        let index = self.bucket_index(peer_id)?;
        let bucket = &mut self.buckets[index];
        if let Some(pos) = bucket.find_verified(peer_id) {
            return Some(bucket.verified.remove(pos).address);
        }
        if let Some(pos) = bucket.find_overflow(peer_id) {
            return bucket.overflow.remove(pos).map(|e| e.address);
        }
        None
    }

    /// Record a contact failure.
    ///
    /// Offline failures accumulate and remove the peer once
    /// `offline_count_max` consecutive reports pile up; transient failures
    /// only bump a counter.
    pub fn report_failure(
        &mut self,
        peer_id: &Id160,
        kind: FailureKind,
        _now: Timestamp,
    ) -> FailureOutcome {
        let Some(index) = self.bucket_index(peer_id) else {
            return FailureOutcome::Unknown;
        };
        let offline_max = self.config.offline_count_max;
        let bucket = &mut self.buckets[index];

        let in_verified = bucket.find_verified(peer_id);
        let entry = match in_verified {
            Some(pos) => &mut bucket.verified[pos],
            None => match bucket.find_overflow(peer_id) {
                Some(pos) => &mut bucket.overflow[pos],
                None => return FailureOutcome::Unknown,
            },
        };

        match kind {
            FailureKind::Transient => {
                entry.transient_failures = entry.transient_failures.saturating_add(1);
                FailureOutcome::Counted
            }
            FailureKind::Offline => {
                entry.offline_count = entry.offline_count.saturating_add(1);
                if entry.offline_count >= offline_max {
                    let address = entry.address.clone();
                    match in_verified {
                        Some(pos) => {
                            bucket.verified.remove(pos);
                        }
                        None => {
                            if let Some(pos) = bucket.find_overflow(peer_id) {
                                bucket.overflow.remove(pos);
                            }
                        }
                    }
                    FailureOutcome::Removed(address)
                } else {
                    FailureOutcome::Counted
                }
            }
        }
    }

    /// Record a successful contact: refresh `last_seen`, clear the offline
    /// allowance.
    pub fn touch(&mut self, peer_id: &Id160, now: Timestamp) -> bool {
        let Some(index) = self.bucket_index(peer_id) else {
            return false;
        };
        let bucket = &mut self.buckets[index];
        if let Some(pos) = bucket.find_verified(peer_id) {
            let entry = &mut bucket.verified[pos];
            entry.last_seen = now;
            entry.offline_count = 0;
            return true;
        }
        if let Some(pos) = bucket.find_overflow(peer_id) {
            let entry = &mut bucket.overflow[pos];
            entry.last_seen = now;
            return true;
        }
        false
    }

    /// Up to `k` verified peers sorted by ascending XOR distance to
    /// `target`, peer-id order breaking ties.
    pub fn closest_peers(&self, target: &Id160, k: usize) -> Vec<PeerAddress> {
        let mut peers: Vec<&PeerEntry> = self
            .buckets
            .iter()
            .flat_map(|b| b.verified.iter())
            .collect();
        peers.sort_by(|a, b| cmp_by_distance(&a.address.peer_id, &b.address.peer_id, target));
        peers.into_iter().take(k).map(|e| e.address.clone()).collect()
    }

    pub fn contains_verified(&self, peer_id: &Id160) -> bool {
        self.bucket_index(peer_id)
            .map(|i| self.buckets[i].find_verified(peer_id).is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, peer_id: &Id160) -> Option<PeerAddress> {
        let index = self.bucket_index(peer_id)?;
        let bucket = &self.buckets[index];
        bucket
            .find_verified(peer_id)
            .map(|pos| bucket.verified[pos].address.clone())
            .or_else(|| {
                bucket
                    .find_overflow(peer_id)
                    .map(|pos| bucket.overflow[pos].address.clone())
            })
    }

    /// Snapshot of all verified peers, unordered.
    pub fn all(&self) -> Vec<PeerAddress> {
        self.buckets
            .iter()
            .flat_map(|b| b.verified.iter().map(|e| e.address.clone()))
            .collect()
    }

    /// Snapshot of all overflow peers, unordered.
    pub fn all_overflow(&self) -> Vec<PeerAddress> {
        self.buckets
            .iter()
            .flat_map(|b| b.overflow.iter().map(|e| e.address.clone()))
            .collect()
    }

    /// Random sample of verified peers for PEER-EXCHANGE payloads.
    pub fn sample<R: rand::Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<PeerAddress> {
        use rand::seq::SliceRandom;
        let mut all = self.all();
        all.shuffle(rng);
        all.truncate(count);
        all
    }

    pub fn stats(&self, now: Timestamp) -> PeerMapStats {
        let verified_count = self.buckets.iter().map(|b| b.verified.len()).sum();
        let overflow_count = self.buckets.iter().map(|b| b.overflow.len()).sum();
        let buckets_in_use = self
            .buckets
            .iter()
            .filter(|b| !b.verified.is_empty() || !b.overflow.is_empty())
            .count();
        let oldest_verified_age_millis = self
            .buckets
            .iter()
            .flat_map(|b| b.verified.iter())
            .map(|e| e.last_seen.millis_until(now))
            .max()
            .unwrap_or(0);
        PeerMapStats {
            verified_count,
            overflow_count,
            buckets_in_use,
            oldest_verified_age_millis,
        }
    }

    /// Age out stale overflow entries and nominate stale verified peers for
    /// a liveness ping.
    pub fn maintenance(&mut self, now: Timestamp) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let overflow_deadline = self.config.overflow_timeout_millis;
        for bucket in &mut self.buckets {
            let mut kept = VecDeque::with_capacity(bucket.overflow.len());
            while let Some(entry) = bucket.overflow.pop_front() {
                if entry.last_seen.millis_until(now) < overflow_deadline {
                    kept.push_back(entry);
                } else {
                    report.expired_overflow.push(entry.address);
                }
            }
            bucket.overflow = kept;
        }

        let mut stale: Vec<(&PeerEntry, u64)> = self
            .buckets
            .iter()
            .flat_map(|b| b.verified.iter())
            .map(|e| (e, now.as_millis().saturating_sub(e.last_seen.as_millis())))
            .filter(|(_, age)| *age >= self.config.stale_after_millis)
            .collect();
        stale.sort_by(|a, b| b.1.cmp(&a.1));
        report.ping_candidates = stale
            .into_iter()
            .take(self.config.max_ping_candidates)
            .map(|(e, _)| e.address.clone())
            .collect();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::PeerSocket;

    fn id(value: u8) -> Id160 {
        Id160::from_low_u8(value)
    }

    fn addr(value: u8) -> PeerAddress {
        PeerAddress::new(id(value), PeerSocket::localhost(4000 + value as u16))
    }

    fn map() -> PeerMap {
        PeerMap::new(Id160::ZERO, PeerMapConfig::default())
    }

    fn now() -> Timestamp {
        Timestamp::from_millis(1_000)
    }

    // =========================================================================
    // Bucket placement
    // =========================================================================

    #[test]
    fn test_bucket_index_matches_bit_length() {
        let map = map();
        // distance to id(1) is 1 → bit length 1 → bucket 159.
        assert_eq!(map.bucket_index(&id(1)), Some(159));
        // distance with the top bit set → bit length 160 → bucket 0.
        let mut top = [0u8; 20];
        top[0] = 0x80;
        assert_eq!(map.bucket_index(&Id160::new(top)), Some(0));
    }

    #[test]
    fn test_self_insertion_is_refused() {
        let mut map = map();
        let self_addr = PeerAddress::new(Id160::ZERO, PeerSocket::localhost(1));
        assert!(matches!(
            map.add(self_addr, true, now()),
            Err(PeerMapError::SelfInsertion)
        ));
    }

    #[test]
    fn test_no_id_appears_twice() {
        let mut map = map();
        map.add(addr(1), false, now()).unwrap();
        let outcome = map.add(addr(1), true, now()).unwrap();

        assert_eq!(outcome, AddOutcome::Replaced, "promotion replaces overflow");
        assert!(map.contains_verified(&id(1)));
        assert!(
            map.all_overflow().iter().all(|a| a.peer_id != id(1)),
            "promoted entry left the overflow bag"
        );
    }

    // =========================================================================
    // Bag capacity
    // =========================================================================

    #[test]
    fn test_re_adding_verified_refreshes_in_place() {
        let mut map = map();
        assert_eq!(map.add(addr(2), true, now()).unwrap(), AddOutcome::Inserted);
        assert_eq!(
            map.add(addr(2), true, now()).unwrap(),
            AddOutcome::Replaced,
            "same id refreshes the existing entry"
        );
        assert_eq!(map.stats(now()).verified_count, 1);
    }

    #[test]
    fn test_full_verified_bag_rejects_and_retains_in_overflow() {
        let mut config = PeerMapConfig::default();
        config.bag_size = 1;
        let mut map = PeerMap::new(Id160::ZERO, config);

        // ids 2 and 3 share bucket 158.
        assert_eq!(map.add(addr(2), true, now()).unwrap(), AddOutcome::Inserted);
        assert_eq!(map.add(addr(3), true, now()).unwrap(), AddOutcome::Rejected);

        assert!(map.contains_verified(&id(2)));
        assert!(
            map.all_overflow().iter().any(|a| a.peer_id == id(3)),
            "rejected verified candidate is kept as overflow"
        );
    }

    #[test]
    fn test_overflow_evicts_fifo() {
        let mut config = PeerMapConfig::default();
        config.bag_size = 2;
        let mut map = PeerMap::new(Id160::ZERO, config);

        // ids 4..=7 all have bit length 3 → same bucket 157.
        map.add(addr(4), false, now()).unwrap();
        map.add(addr(5), false, now()).unwrap();
        map.add(addr(6), false, now()).unwrap();

        let overflow = map.all_overflow();
        assert_eq!(overflow.len(), 2);
        assert!(
            overflow.iter().all(|a| a.peer_id != id(4)),
            "oldest overflow entry evicted first"
        );
    }

    // =========================================================================
    // Failure accounting
    // =========================================================================

    #[test]
    fn test_three_offline_reports_remove_peer() {
        let mut map = map();
        map.add(addr(1), true, now()).unwrap();

        assert_eq!(
            map.report_failure(&id(1), FailureKind::Offline, now()),
            FailureOutcome::Counted
        );
        assert_eq!(
            map.report_failure(&id(1), FailureKind::Offline, now()),
            FailureOutcome::Counted
        );
        let outcome = map.report_failure(&id(1), FailureKind::Offline, now());
        assert!(matches!(outcome, FailureOutcome::Removed(_)));
        assert!(!map.contains_verified(&id(1)));
    }

    #[test]
    fn test_touch_resets_offline_allowance() {
        let mut map = map();
        map.add(addr(1), true, now()).unwrap();

        map.report_failure(&id(1), FailureKind::Offline, now());
        map.report_failure(&id(1), FailureKind::Offline, now());
        assert!(map.touch(&id(1), now()), "touch finds the peer");

        // Counter restarted: two more failures still only count.
        map.report_failure(&id(1), FailureKind::Offline, now());
        assert_eq!(
            map.report_failure(&id(1), FailureKind::Offline, now()),
            FailureOutcome::Counted
        );
        assert!(map.contains_verified(&id(1)));
    }

    #[test]
    fn test_transient_failures_never_remove() {
        let mut map = map();
        map.add(addr(1), true, now()).unwrap();

        for _ in 0..10 {
            assert_eq!(
                map.report_failure(&id(1), FailureKind::Transient, now()),
                FailureOutcome::Counted
            );
        }
        assert!(map.contains_verified(&id(1)));
    }

    // =========================================================================
    // Closest-set queries
    // =========================================================================

    #[test]
    fn test_closest_peers_sorted_by_xor_distance() {
        let mut map = map();
        for value in [1u8, 2, 4, 8, 16] {
            map.add(addr(value), true, now()).unwrap();
        }

        let closest = map.closest_peers(&Id160::ZERO, 3);
        let ids: Vec<Id160> = closest.iter().map(|a| a.peer_id).collect();
        assert_eq!(ids, vec![id(1), id(2), id(4)]);
    }

    #[test]
    fn test_closest_peers_excludes_overflow() {
        let mut map = map();
        map.add(addr(1), false, now()).unwrap();
        map.add(addr(2), true, now()).unwrap();

        let closest = map.closest_peers(&Id160::ZERO, 10);
        assert_eq!(closest.len(), 1);
        assert_eq!(closest[0].peer_id, id(2));
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    #[test]
    fn test_maintenance_ages_out_overflow() {
        let mut map = PeerMap::new(Id160::ZERO, PeerMapConfig::for_testing());
        map.add(addr(1), false, Timestamp::from_millis(0)).unwrap();
        map.add(addr(2), true, Timestamp::from_millis(0)).unwrap();

        let report = map.maintenance(Timestamp::from_millis(5_000));
        assert_eq!(report.expired_overflow.len(), 1);
        assert_eq!(report.expired_overflow[0].peer_id, id(1));
        assert!(map.contains_verified(&id(2)), "verified entries never age out");
    }

    #[test]
    fn test_maintenance_nominates_stalest_for_ping() {
        let mut map = PeerMap::new(Id160::ZERO, PeerMapConfig::for_testing());
        map.add(addr(1), true, Timestamp::from_millis(0)).unwrap();
        map.add(addr(2), true, Timestamp::from_millis(400)).unwrap();

        let report = map.maintenance(Timestamp::from_millis(1_000));
        assert_eq!(report.ping_candidates.len(), 2);
        assert_eq!(
            report.ping_candidates[0].peer_id,
            id(1),
            "stalest peer listed first"
        );
    }
}
