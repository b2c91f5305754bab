//! The replication controller.
//!
//! Keeps every locally stored item on the R peers closest to its location
//! key. Reacts to peer map changes (a closer newcomer, a lost neighbor) and
//! sweeps periodically so replicas converge even when events were missed.
//!
//! A peer is responsible for a location iff it ranks among the R closest
//! verified peers to it, ids breaking distance ties.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use hm_01_peer_map::{PeerMapListener, PeerMapService, RemoveReason};
use hm_02_storage::StorageLayer;
use rand::Rng;
use shared_types::{cmp_by_distance, Id160, PeerAddress};
use tracing::{debug, trace};

use crate::config::{ReplicationConfig, ReplicationStrategy};
use crate::ports::ReplicaSender;

pub struct ReplicationController {
    self_id: Id160,
    peer_map: Arc<PeerMapService>,
    storage: Arc<StorageLayer>,
    sender: Arc<dyn ReplicaSender>,
    strategy: Arc<dyn ReplicationStrategy>,
    /// Shared with the operations layer so R adapts everywhere at once.
    replication_factor: Arc<AtomicUsize>,
    config: ReplicationConfig,
}

impl ReplicationController {
    /// Build the controller and subscribe it to the peer map.
    pub fn new(
        peer_map: Arc<PeerMapService>,
        storage: Arc<StorageLayer>,
        sender: Arc<dyn ReplicaSender>,
        strategy: Arc<dyn ReplicationStrategy>,
        replication_factor: Arc<AtomicUsize>,
        config: ReplicationConfig,
    ) -> Arc<Self> {
        let controller = Arc::new(Self {
            self_id: peer_map.self_id(),
            peer_map: Arc::clone(&peer_map),
            storage,
            sender,
            strategy,
            replication_factor,
            config,
        });
        peer_map.add_listener(Arc::new(MapEvents {
            controller: Arc::downgrade(&controller),
        }));
        controller
    }

    fn replication_factor(&self) -> usize {
        self.replication_factor.load(Ordering::SeqCst).max(1)
    }

    /// Is the local peer among the R closest to `location`?
    pub fn is_self_responsible(&self, location: &Id160) -> bool {
        let r = self.replication_factor();
        let closest = self.peer_map.closest_peers(location, r);
        let closer_others = closest
            .iter()
            .filter(|peer| cmp_by_distance(&peer.peer_id, &self.self_id, location).is_lt())
            .count();
        closer_others < r
    }

    /// Re-check at fire time whether `peer_id` still deserves copies of
    /// `location`: it must still be mapped and still rank among the R
    /// closest.
    pub fn should_send_to(&self, location: &Id160, peer_id: &Id160) -> Option<PeerAddress> {
        let address = self.peer_map.get(peer_id)?;
        let r = self.replication_factor();
        self.peer_map
            .closest_peers(location, r)
            .iter()
            .any(|candidate| candidate.peer_id == *peer_id)
            .then_some(address)
    }

    /// I own `location`: push copies to the current closest R-1 peers.
    pub async fn me_responsible(&self, location: Id160) {
        self.storage.add_responsibility(location, self.self_id);
        let r = self.replication_factor();
        let targets = self
            .peer_map
            .closest_peers(&location, r.saturating_sub(1).max(1));
        for peer in targets {
            let sent = self.sender.send_copies(location, &peer).await;
            trace!(?location, peer = ?peer.peer_id, sent, "replica refresh");
        }
    }

    /// `other` ranks ahead of me for `location`: hand it my copies. With
    /// `delayed`, wait a random 0..`delay_millis` jitter and re-check
    /// responsibility before sending, so a mass join does not stampede.
    pub async fn other_responsible(self: &Arc<Self>, location: Id160, other: Id160, delayed: bool) {
        if delayed {
            let jitter = rand::thread_rng().gen_range(0..=self.config.delay_millis);
            let controller = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(jitter)).await;
                // The map may have churned during the jitter window; only
                // send when the transfer is still warranted.
                if let Some(address) = controller.should_send_to(&location, &other) {
                    let sent = controller.sender.send_copies(location, &address).await;
                    debug!(?location, peer = ?other, sent, "delayed transfer fired");
                } else {
                    trace!(?location, peer = ?other, "delayed transfer skipped");
                }
            });
            return;
        }
        if let Some(address) = self.should_send_to(&location, &other) {
            let sent = self.sender.send_copies(location, &address).await;
            trace!(?location, peer = ?other, sent, "direct transfer");
        }
    }

    /// One refresh pass: adapt R, then re-publish everything this peer
    /// stores toward its current replica set.
    pub async fn sweep(self: &Arc<Self>) {
        let verified = self.peer_map.stats().verified_count;
        let r = self.strategy.replication_factor(verified).max(1);
        self.replication_factor.store(r, Ordering::SeqCst);

        for location in self.storage.stored_locations() {
            if self.is_self_responsible(&location) {
                self.me_responsible(location).await;
            } else {
                self.storage.remove_responsibility(&location);
                if let Some(best) = self.peer_map.closest_peers(&location, 1).into_iter().next() {
                    self.other_responsible(location, best.peer_id, false).await;
                }
            }
        }
    }

    /// Spawn the periodic refresh task. Runs until aborted.
    pub fn spawn_refresh_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        let period = std::time::Duration::from_millis(controller.config.interval_millis.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                controller.sweep().await;
            }
        })
    }

    fn on_verified_insert(self: Arc<Self>, address: PeerAddress) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        handle.spawn(async move {
            for location in self.storage.stored_locations() {
                if self.should_send_to(&location, &address.peer_id).is_some() {
                    self.other_responsible(location, address.peer_id, true).await;
                }
            }
        });
    }

    fn on_peer_removed(self: Arc<Self>, address: PeerAddress) {
        self.storage.remove_responsible_peer(&address.peer_id);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        handle.spawn(async move {
            for location in self.storage.stored_locations() {
                if self.is_self_responsible(&location) {
                    self.me_responsible(location).await;
                }
            }
        });
    }
}

/// Peer map subscription; weak so shutdown can drop the controller.
struct MapEvents {
    controller: Weak<ReplicationController>,
}

impl PeerMapListener for MapEvents {
    fn peer_inserted(&self, address: &PeerAddress, verified: bool) {
        if !verified {
            return;
        }
        if let Some(controller) = self.controller.upgrade() {
            controller.on_verified_insert(address.clone());
        }
    }

    fn peer_removed(&self, address: &PeerAddress, _reason: RemoveReason) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_peer_removed(address.clone());
        }
    }

    fn peer_updated(&self, _address: &PeerAddress) {}
}
