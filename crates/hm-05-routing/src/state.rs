//! Pure bookkeeping of one iterative search.
//!
//! Candidates live in a map ordered by `(XOR distance to target, peer id)`,
//! so "closest unasked" and "top-k converged" are range walks. The state
//! never does I/O; the router drives it with responses.

use std::collections::{BTreeMap, HashMap, HashSet};

use hm_02_storage::DigestInfo;
use shared_types::{Id160, PeerAddress};

/// Ordering key: distance first, peer id as the tie break.
type DistanceKey = (Id160, Id160);

fn distance_key(target: &Id160, peer_id: &Id160) -> DistanceKey {
    (peer_id.distance(target), *peer_id)
}

#[derive(Debug)]
pub struct RoutingState {
    target: Id160,
    k: usize,
    candidates: BTreeMap<DistanceKey, PeerAddress>,
    /// Peers a query was issued to (regardless of outcome).
    asked: HashSet<Id160>,
    /// Peers that answered successfully.
    queried: HashSet<Id160>,
    /// Location digests reported by responders.
    digests: HashMap<Id160, DigestInfo>,
    failures: usize,
    no_new_info: usize,
}

impl RoutingState {
    pub fn new(target: Id160, k: usize) -> Self {
        Self {
            target,
            k,
            candidates: BTreeMap::new(),
            asked: HashSet::new(),
            queried: HashSet::new(),
            digests: HashMap::new(),
            failures: 0,
            no_new_info: 0,
        }
    }

    pub fn target(&self) -> &Id160 {
        &self.target
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn no_new_info(&self) -> usize {
        self.no_new_info
    }

    /// Merge peers into the candidate set. Returns true when at least one
    /// newcomer ranks inside the current top-k (i.e. the answer taught us
    /// something).
    pub fn add_candidates<I>(&mut self, peers: I) -> bool
    where
        I: IntoIterator<Item = PeerAddress>,
    {
        let mut new_info = false;
        for peer in peers {
            let key = distance_key(&self.target, &peer.peer_id);
            if self.candidates.contains_key(&key) {
                continue;
            }
            self.candidates.insert(key, peer);
            let rank = self
                .candidates
                .range(..key)
                .count();
            if rank < self.k {
                new_info = true;
            }
        }
        new_info
    }

    /// The closest candidate not yet asked.
    pub fn next_candidate(&mut self) -> Option<PeerAddress> {
        let next = self
            .candidates
            .values()
            .find(|peer| !self.asked.contains(&peer.peer_id))
            .cloned()?;
        self.asked.insert(next.peer_id);
        Some(next)
    }

    /// Record a successful answer with the peers (and optional digest) it
    /// reported.
    pub fn report_success(
        &mut self,
        peer_id: Id160,
        returned: Vec<PeerAddress>,
        digest: Option<DigestInfo>,
    ) {
        self.queried.insert(peer_id);
        if let Some(digest) = digest {
            self.digests.insert(peer_id, digest);
        }
        if self.add_candidates(returned) {
            self.no_new_info = 0;
        } else {
            self.no_new_info += 1;
        }
    }

    /// Record a failed query; the peer leaves the candidate set.
    pub fn report_failure(&mut self, peer_id: &Id160) {
        self.failures += 1;
        self.candidates
            .remove(&distance_key(&self.target, peer_id));
    }

    /// True once the k closest known candidates have all answered.
    pub fn top_k_queried(&self) -> bool {
        let mut seen = 0;
        for peer in self.candidates.values() {
            if !self.queried.contains(&peer.peer_id) {
                return false;
            }
            seen += 1;
            if seen >= self.k {
                break;
            }
        }
        seen > 0
    }

    pub fn should_terminate(&self, max_no_new_info: usize, max_failures: usize) -> bool {
        self.top_k_queried()
            || self.no_new_info >= max_no_new_info
            || self.failures >= max_failures
    }

    /// The k closest peers that answered, sorted by distance (peer id as the
    /// tie break).
    pub fn survivors(&self) -> Vec<PeerAddress> {
        self.candidates
            .values()
            .filter(|peer| self.queried.contains(&peer.peer_id))
            .take(self.k)
            .cloned()
            .collect()
    }

    pub fn into_digests(self) -> HashMap<Id160, DigestInfo> {
        self.digests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::PeerSocket;

    fn addr(value: u8) -> PeerAddress {
        PeerAddress::new(Id160::from_low_u8(value), PeerSocket::localhost(4000))
    }

    fn state(k: usize) -> RoutingState {
        RoutingState::new(Id160::ZERO, k)
    }

    #[test]
    fn test_candidates_come_out_closest_first() {
        let mut state = state(4);
        state.add_candidates(vec![addr(8), addr(1), addr(4)]);

        assert_eq!(state.next_candidate().unwrap().peer_id, Id160::from_low_u8(1));
        assert_eq!(state.next_candidate().unwrap().peer_id, Id160::from_low_u8(4));
        assert_eq!(state.next_candidate().unwrap().peer_id, Id160::from_low_u8(8));
        assert!(state.next_candidate().is_none(), "each peer asked once");
    }

    #[test]
    fn test_new_closer_candidate_counts_as_new_info() {
        let mut state = state(2);
        state.add_candidates(vec![addr(8), addr(9)]);

        assert!(state.add_candidates(vec![addr(1)]), "closer peer is news");
        assert!(
            !state.add_candidates(vec![addr(1)]),
            "already-known peer is not"
        );
    }

    #[test]
    fn test_no_new_info_counter_resets_on_progress() {
        let mut state = state(2);
        state.add_candidates(vec![addr(8), addr(9)]);

        state.report_success(Id160::from_low_u8(8), vec![], None);
        assert_eq!(state.no_new_info(), 1);
        state.report_success(Id160::from_low_u8(9), vec![addr(1)], None);
        assert_eq!(state.no_new_info(), 0, "closer candidate resets the counter");
    }

    #[test]
    fn test_termination_when_top_k_queried() {
        let mut state = state(2);
        state.add_candidates(vec![addr(1), addr(2), addr(8)]);
        assert!(!state.top_k_queried());

        state.report_success(Id160::from_low_u8(1), vec![], None);
        state.report_success(Id160::from_low_u8(2), vec![], None);
        assert!(state.top_k_queried(), "two closest of k=2 answered");
        assert!(state.should_terminate(10, 10));
    }

    #[test]
    fn test_failed_peer_leaves_the_result() {
        let mut state = state(4);
        state.add_candidates(vec![addr(1), addr(2)]);
        state.report_success(Id160::from_low_u8(2), vec![], None);
        state.report_failure(&Id160::from_low_u8(1));

        let survivors = state.survivors();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].peer_id, Id160::from_low_u8(2));
    }

    #[test]
    fn test_survivors_sorted_by_distance() {
        let mut state = state(4);
        state.add_candidates(vec![addr(4), addr(1), addr(8), addr(2)]);
        for value in [4u8, 1, 8, 2] {
            state.report_success(Id160::from_low_u8(value), vec![], None);
        }

        let ids: Vec<Id160> = state.survivors().iter().map(|p| p.peer_id).collect();
        assert_eq!(
            ids,
            vec![
                Id160::from_low_u8(1),
                Id160::from_low_u8(2),
                Id160::from_low_u8(4),
                Id160::from_low_u8(8)
            ]
        );
    }
}
