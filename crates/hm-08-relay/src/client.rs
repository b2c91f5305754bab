//! The unreachable peer's side of relaying.
//!
//! Selects relay candidates from the known neighborhood, registers with up
//! to `max_relays` of them over long-lived connections, advertises itself
//! with `relayed` set and the relay socket list, and replaces lost relays as
//! it goes.

use std::sync::{Arc, Mutex};

use hm_01_peer_map::PeerMapService;
use hm_04_rpc::{ChannelKind, Command, MessageBody, RequestSender};
use shared_types::PeerAddress;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("relay setup failed: {established} established, {required} required")]
    SetupFailed { established: usize, required: usize },
}

pub struct RelayClient {
    peer_map: Arc<PeerMapService>,
    sender: Arc<RequestSender>,
    config: RelayConfig,
    /// The peer's own firewalled address before relay decoration.
    base_address: PeerAddress,
    relays: Mutex<Vec<PeerAddress>>,
}

impl RelayClient {
    pub fn new(
        peer_map: Arc<PeerMapService>,
        sender: Arc<RequestSender>,
        config: RelayConfig,
        base_address: PeerAddress,
    ) -> Arc<Self> {
        Arc::new(Self {
            peer_map,
            sender,
            config,
            base_address,
            relays: Mutex::new(Vec::new()),
        })
    }

    pub fn relays(&self) -> Vec<PeerAddress> {
        self.relays.lock().expect("relay list poisoned").clone()
    }

    /// Relay candidates: reachable, un-relayed peers we know, current
    /// relays excluded.
    fn candidates(&self) -> Vec<PeerAddress> {
        let current = self.relays();
        let mut seen: Vec<PeerAddress> = Vec::new();
        for peer in self
            .peer_map
            .all()
            .into_iter()
            .chain(self.peer_map.all_overflow())
        {
            if peer.is_unreachable() || peer.relayed {
                continue;
            }
            if current.iter().any(|relay| relay.peer_id == peer.peer_id) {
                continue;
            }
            if seen.iter().any(|known| known.peer_id == peer.peer_id) {
                continue;
            }
            seen.push(peer);
        }
        seen
    }

    /// Rewrite the advertised address to the current relay set.
    fn rewrite_address(&self) {
        let sockets = self
            .relays()
            .iter()
            .map(|relay| relay.socket)
            .collect::<Vec<_>>();
        let address = self.base_address.clone().with_relays(sockets);
        debug!(relays = address.relay_sockets.len(), "advertised address rewritten");
        self.sender.set_self_address(address);
    }

    /// Register with one candidate relay.
    async fn register_with(&self, candidate: &PeerAddress) -> bool {
        let outcome = self
            .sender
            .send(
                candidate,
                Command::Relay,
                MessageBody::RelaySetup,
                ChannelKind::PermanentTcp,
            )
            .await_result()
            .await;
        match outcome {
            Ok(response) if response.is_ok() => {
                self.relays
                    .lock()
                    .expect("relay list poisoned")
                    .push(candidate.clone());
                true
            }
            _ => false,
        }
    }

    /// Fill empty relay slots from the candidate list. Returns how many
    /// relays are established afterwards.
    async fn fill_slots(&self) -> usize {
        for candidate in self.candidates() {
            if self.relays().len() >= self.config.max_relays {
                break;
            }
            if self.register_with(&candidate).await {
                info!(relay = ?candidate.peer_id, "relay registered");
            }
        }
        self.relays().len()
    }

    /// Re-introduce the rewritten address to every known peer. A ping
    /// carries the new sender address, and receivers refresh their map
    /// entry from it.
    async fn announce(&self) {
        for peer in self.peer_map.all() {
            let _ = self
                .sender
                .send(&peer, Command::Ping, MessageBody::Empty, ChannelKind::Udp)
                .await_result()
                .await;
        }
    }

    /// Initial relay setup. Fails when fewer than `min_relays` could be
    /// established; any partial set is kept for the maintenance task to
    /// grow.
    pub async fn setup(&self) -> Result<usize, RelayError> {
        let established = self.fill_slots().await;
        if established < self.config.min_relays {
            return Err(RelayError::SetupFailed {
                established,
                required: self.config.min_relays,
            });
        }
        self.rewrite_address();
        self.announce().await;
        Ok(established)
    }

    /// One maintenance pass: drop dead relays, recruit replacements,
    /// re-advertise when the set changed.
    pub async fn maintain(&self) {
        let current = self.relays();
        let mut alive = Vec::new();
        for relay in current {
            let reachable = self
                .sender
                .send(&relay, Command::Ping, MessageBody::Empty, ChannelKind::Udp)
                .await_result()
                .await
                .is_ok();
            if reachable {
                alive.push(relay);
            } else {
                warn!(relay = ?relay.peer_id, "relay lost, selecting replacement");
            }
        }
        let lost_some = {
            let mut relays = self.relays.lock().expect("relay list poisoned");
            let lost = relays.len() != alive.len();
            *relays = alive;
            lost
        };

        let before = self.relays().len();
        let after = self.fill_slots().await;
        if lost_some || after != before {
            self.rewrite_address();
            self.announce().await;
        }
        if after < self.config.min_relays {
            warn!(
                established = after,
                required = self.config.min_relays,
                "below minimum relay count"
            );
        }
    }

    /// Spawn the periodic relay maintenance task. Runs until aborted.
    pub fn spawn_maintenance_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(self);
        let period =
            std::time::Duration::from_millis(client.config.maintenance_interval_millis.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                client.maintain().await;
            }
        })
    }
}
