//! The iterative router.
//!
//! Seeds a search with the local closest set, keeps α NEIGHBORS queries in
//! flight toward the closest unasked candidates, merges every answer back
//! into the candidate set, and stops on convergence, stagnation or failure
//! budget. Responders are promoted to verified map entries; reported peers
//! enter the overflow bag; unresponsive peers are reported offline.

use std::collections::HashMap;
use std::sync::Arc;

use hm_01_peer_map::{FailureKind, PeerMapService};
use hm_02_storage::DigestInfo;
use hm_04_rpc::{ChannelKind, Command, FailReason, Message, MessageBody, RequestSender};
use shared_types::{Id160, PeerAddress};
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::config::RoutingConfig;
use crate::state::RoutingState;

/// Outcome of one routing pass.
#[derive(Debug, Default)]
pub struct RoutingResult {
    /// The closest responding peers, ascending XOR distance.
    pub closest: Vec<PeerAddress>,
    /// Per-responder digests of the target location.
    pub digests: HashMap<Id160, DigestInfo>,
}

/// Drives iterative closest-node searches.
pub struct IterativeRouter {
    peer_map: Arc<PeerMapService>,
    sender: Arc<RequestSender>,
}

impl IterativeRouter {
    pub fn new(peer_map: Arc<PeerMapService>, sender: Arc<RequestSender>) -> Self {
        Self { peer_map, sender }
    }

    /// Search toward `target` seeded from the local map.
    pub async fn route_to_closest(&self, target: Id160, config: &RoutingConfig) -> RoutingResult {
        self.route_with_seed(target, config, &[]).await
    }

    /// Search toward `target` with extra seed peers (bootstrap).
    pub async fn route_with_seed(
        &self,
        target: Id160,
        config: &RoutingConfig,
        extra_seed: &[PeerAddress],
    ) -> RoutingResult {
        let self_id = self.peer_map.self_id();
        let mut state = RoutingState::new(target, config.k);
        state.add_candidates(
            self.peer_map
                .closest_peers(&target, config.k)
                .into_iter()
                .chain(extra_seed.iter().cloned())
                .filter(|peer| peer.peer_id != self_id),
        );

        let max_no_new_info = config.effective_no_new_info();
        let mut in_flight: JoinSet<(PeerAddress, Result<Message, FailReason>)> = JoinSet::new();

        loop {
            while in_flight.len() < config.alpha {
                let Some(candidate) = state.next_candidate() else {
                    break;
                };
                trace!(operation = ?config.operation, peer = ?candidate.peer_id, "query neighbors");
                let promise = self.sender.send(
                    &candidate,
                    Command::Neighbors,
                    MessageBody::NeighborsQuery { target },
                    ChannelKind::Udp,
                );
                in_flight.spawn(async move {
                    let outcome = promise.await_result().await;
                    (candidate, outcome)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                // Nothing left to ask and nothing in flight.
                break;
            };
            let Ok((candidate, outcome)) = joined else {
                continue;
            };

            match outcome {
                Ok(response) if response.is_ok() => {
                    let (peers, digest) = match response.body {
                        MessageBody::Neighbors { peers, digest } => (peers, digest),
                        _ => (Vec::new(), None),
                    };
                    // The responder proved itself; what it reported is
                    // hearsay until contacted.
                    let _ = self.peer_map.add(response.sender.clone(), true);
                    for peer in &peers {
                        if peer.peer_id != self_id {
                            let _ = self.peer_map.add(peer.clone(), false);
                        }
                    }
                    let peers = peers
                        .into_iter()
                        .filter(|peer| peer.peer_id != self_id)
                        .collect();
                    state.report_success(candidate.peer_id, peers, digest);
                }
                Ok(_) | Err(_) => {
                    state.report_failure(&candidate.peer_id);
                    self.peer_map
                        .report_failure(&candidate.peer_id, FailureKind::Offline);
                }
            }

            if state.should_terminate(max_no_new_info, config.max_failures) {
                break;
            }
        }

        in_flight.abort_all();
        let closest = state.survivors();
        debug!(
            operation = ?config.operation,
            target = ?target,
            found = closest.len(),
            failures = state.failures(),
            "routing settled"
        );
        RoutingResult {
            closest,
            digests: state.into_digests(),
        }
    }
}
