//! Broadcast fan-out with duplicate suppression.
//!
//! Every broadcast message carries a random id and a hop counter. A peer
//! delivers a payload to its handler at most once (bounded seen-cache) and
//! forwards it to a sample of its verified peers until the hop limit.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use hm_01_peer_map::{FailureKind, PeerMapService};
use hm_04_rpc::{ChannelKind, Command, FailReason, MessageBody, RequestSender};
use shared_types::{Id160, PeerAddress};
use tracing::{debug, trace};

use crate::ports::BroadcastHandler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Hops after which a message stops spreading.
    pub hop_limit: u8,
    /// Verified peers each hop forwards to.
    pub fanout: usize,
    /// Bounded size of the duplicate-suppression cache.
    pub seen_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            hop_limit: 7,
            fanout: 8,
            seen_capacity: 1024,
        }
    }
}

/// FIFO-bounded set of already-seen broadcast ids.
#[derive(Debug, Default)]
struct SeenCache {
    set: HashSet<Id160>,
    order: VecDeque<Id160>,
}

impl SeenCache {
    /// True when the id was new.
    fn mark(&mut self, id: Id160, capacity: usize) -> bool {
        if !self.set.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > capacity {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

/// Delivers and forwards broadcast payloads.
pub struct BroadcastDispatcher {
    config: BroadcastConfig,
    peer_map: Arc<PeerMapService>,
    sender: Arc<RequestSender>,
    handler: Arc<dyn BroadcastHandler>,
    seen: Mutex<SeenCache>,
}

impl BroadcastDispatcher {
    pub fn new(
        config: BroadcastConfig,
        peer_map: Arc<PeerMapService>,
        sender: Arc<RequestSender>,
        handler: Arc<dyn BroadcastHandler>,
    ) -> Self {
        Self {
            config,
            peer_map,
            sender,
            handler,
            seen: Mutex::new(SeenCache::default()),
        }
    }

    fn mark_seen(&self, id: Id160) -> bool {
        self.seen
            .lock()
            .expect("seen cache poisoned")
            .mark(id, self.config.seen_capacity)
    }

    /// Handle one incoming (or locally originated) broadcast. Returns the
    /// number of peers it was forwarded to.
    pub fn spread(&self, from: &PeerAddress, broadcast_id: Id160, hop: u8, payload: &[u8]) -> usize {
        if !self.mark_seen(broadcast_id) {
            trace!(id = ?broadcast_id, "duplicate broadcast suppressed");
            return 0;
        }
        self.handler.deliver(from, payload);
        if hop >= self.config.hop_limit {
            return 0;
        }

        let own_id = self.peer_map.self_id();
        let mut forwarded = 0;
        for peer in self.peer_map.sample(self.config.fanout) {
            if peer.peer_id == from.peer_id || peer.peer_id == own_id {
                continue;
            }
            let promise = self.sender.send(
                &peer,
                Command::Broadcast,
                MessageBody::Broadcast {
                    broadcast_id,
                    hop: hop + 1,
                    payload: payload.to_vec(),
                },
                ChannelKind::Udp,
            );
            // Fire and forget; a dead peer only costs a failure mark.
            let peer_map = Arc::clone(&self.peer_map);
            let peer_id = peer.peer_id;
            promise.add_listener(move |result| {
                if result.is_err() {
                    peer_map.report_failure(&peer_id, FailureKind::Transient);
                }
            });
            forwarded += 1;
        }
        debug!(id = ?broadcast_id, hop, forwarded, "broadcast spread");
        forwarded
    }

    /// Originate a broadcast from this peer.
    pub fn originate(&self, payload: &[u8]) -> Result<Id160, FailReason> {
        if self.peer_map.all().is_empty() {
            return Err(FailReason::NoBroadcastAddress);
        }
        let broadcast_id = Id160::random(&mut rand::thread_rng());
        let own = self.sender.self_address();
        self.spread(&own, broadcast_id, 0, payload);
        Ok(broadcast_id)
    }
}
