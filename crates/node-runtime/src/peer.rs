//! The peer handle.
//!
//! Owns the whole subsystem arena: peer map, storage, RPC plumbing, router,
//! operations, replication controller and (for firewalled peers) the relay
//! client. Components are created leaves-first and torn down in reverse;
//! handles between them are plain `Arc`s, so shutdown only has to stop
//! tasks, close pools and drop the arena.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hm_01_peer_map::{PeerMapConfig, PeerMapService};
use hm_02_storage::{DataEntry, DigestInfo, StorageConfig, StorageLayer};
use hm_04_rpc::adapters::MemoryNetwork;
use hm_04_rpc::{
    ChannelKind, Command, ConnectionConfig, Dispatcher, FailReason, Message, MessageBody, Promise,
    RequestSender,
};
use hm_05_routing::{IterativeRouter, OperationKind, RoutingConfig};
use hm_06_operations::{
    BroadcastConfig, BroadcastDispatcher, BroadcastHandler, BroadcastRpcHandler, DhtOperations,
    DirectDataHandler, DirectHandler, NeighborsHandler, OperationsConfig, PeerExchangeHandler,
    PingHandler, QuitHandler, StorageHandler, WriteReport,
};
use hm_07_replication::{
    ConstantReplication, ReplicaSender, ReplicationConfig, ReplicationController,
    ReplicationStrategy,
};
use hm_08_relay::{RelayClient, RelayConfig, RelayRpcHandler};
use shared_crypto::{PublicKey, SignatureFactory};
use shared_types::{Id160, Key640, PeerAddress, TimeSource};
use tracing::{debug, info};

use crate::config::PeerConfig;

/// Options of a distributed put.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub public_key: Option<PublicKey>,
    pub put_if_absent: bool,
    pub claim_domain: bool,
}

/// Pushes owned copies of a location branch to one peer; the replication
/// controller's sender port wired to the direct store path.
struct DirectReplicaSender {
    storage: Arc<StorageLayer>,
    operations: Arc<DhtOperations>,
}

#[async_trait]
impl ReplicaSender for DirectReplicaSender {
    async fn send_copies(&self, location: Id160, peer: &PeerAddress) -> usize {
        let (from, to) = Key640::location_range(location);
        let entries = self.storage.get_range(from, to).await;
        if entries.is_empty() {
            return 0;
        }
        self.operations.store_to_peer(peer, entries).await
    }
}

/// Everything the builder assembles.
pub(crate) struct PeerParts {
    pub config: PeerConfig,
    pub address: PeerAddress,
    pub network: Arc<MemoryNetwork>,
    pub signature_factory: Arc<dyn SignatureFactory>,
    pub time_source: Arc<dyn TimeSource>,
    pub direct_handler: Arc<dyn DirectDataHandler>,
    pub broadcast_handler: Arc<dyn BroadcastHandler>,
    pub replication_strategy: Option<Arc<dyn ReplicationStrategy>>,
}

/// A running overlay peer.
pub struct Peer {
    config: PeerConfig,
    address: PeerAddress,
    network: Arc<MemoryNetwork>,
    peer_map: Arc<PeerMapService>,
    storage: Arc<StorageLayer>,
    sender: Arc<RequestSender>,
    dispatcher: Arc<Dispatcher>,
    router: Arc<IterativeRouter>,
    operations: Arc<DhtOperations>,
    replication: Arc<ReplicationController>,
    relay_client: Option<Arc<RelayClient>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl Peer {
    /// Wire all subsystems together, register capabilities and start the
    /// periodic tasks.
    pub(crate) fn assemble(parts: PeerParts) -> Arc<Self> {
        let PeerParts {
            config,
            address,
            network,
            signature_factory,
            time_source,
            direct_handler,
            broadcast_handler,
            replication_strategy,
        } = parts;

        // Leaves first: map and storage.
        let peer_map = Arc::new(PeerMapService::new(
            address.peer_id,
            PeerMapConfig {
                bag_size: config.bag_size,
                ..PeerMapConfig::default()
            },
            Arc::clone(&time_source),
        ));
        let storage = Arc::new(StorageLayer::new(
            StorageConfig {
                check_interval_millis: config.storage_interval_millis,
                ..StorageConfig::default()
            },
            Arc::clone(&time_source),
        ));

        // RPC plumbing.
        let sender = Arc::new(RequestSender::new(
            network.wire(),
            ConnectionConfig {
                idle_timeout_millis: config.idle_timeout_millis,
                max_permits_permanent_tcp: config.max_permits_permanent_tcp,
                max_permits_tcp: config.max_permits_tcp,
                max_permits_udp: config.max_permits_udp,
            },
            address.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(address.peer_id));

        // Routing, broadcast, operations.
        let router = Arc::new(IterativeRouter::new(
            Arc::clone(&peer_map),
            Arc::clone(&sender),
        ));
        let broadcast = Arc::new(BroadcastDispatcher::new(
            BroadcastConfig::default(),
            Arc::clone(&peer_map),
            Arc::clone(&sender),
            broadcast_handler,
        ));
        let replication_factor = Arc::new(AtomicUsize::new(config.replication_factor));
        let operations = Arc::new(DhtOperations::new(
            Arc::clone(&peer_map),
            Arc::clone(&storage),
            Arc::clone(&sender),
            Arc::clone(&router),
            Arc::clone(&broadcast),
            Arc::clone(&replication_factor),
            OperationsConfig {
                alpha: config.alpha,
                k: config.k,
                max_failures: 3,
            },
        ));

        // Capability registration; a disabled RPC never enters the table.
        let caps = &config.capabilities;
        if caps.ping {
            dispatcher.register(
                Command::Ping,
                Arc::new(PingHandler {
                    peer_map: Arc::clone(&peer_map),
                    sender: Arc::clone(&sender),
                }),
            );
        }
        if caps.storage {
            dispatcher.register(
                Command::Store,
                Arc::new(StorageHandler {
                    storage: Arc::clone(&storage),
                    peer_map: Arc::clone(&peer_map),
                    sender: Arc::clone(&sender),
                    signature_factory: Arc::clone(&signature_factory),
                }),
            );
        }
        if caps.neighbors {
            dispatcher.register(
                Command::Neighbors,
                Arc::new(NeighborsHandler {
                    peer_map: Arc::clone(&peer_map),
                    storage: Arc::clone(&storage),
                    sender: Arc::clone(&sender),
                    k: config.k,
                }),
            );
        }
        if caps.direct_data {
            dispatcher.register(
                Command::Direct,
                Arc::new(DirectHandler {
                    port: direct_handler,
                    sender: Arc::clone(&sender),
                }),
            );
        }
        if caps.quit {
            dispatcher.register(
                Command::Quit,
                Arc::new(QuitHandler {
                    peer_map: Arc::clone(&peer_map),
                    sender: Arc::clone(&sender),
                }),
            );
        }
        if caps.peer_exchange {
            dispatcher.register(
                Command::PeerExchange,
                Arc::new(PeerExchangeHandler {
                    peer_map: Arc::clone(&peer_map),
                    sender: Arc::clone(&sender),
                }),
            );
        }
        if caps.broadcast {
            dispatcher.register(
                Command::Broadcast,
                Arc::new(BroadcastRpcHandler {
                    dispatcher: Arc::clone(&broadcast),
                    sender: Arc::clone(&sender),
                }),
            );
        }
        let relay_config = RelayConfig {
            max_relays: config.max_relays,
            min_relays: config.min_relays,
            neighbors_k: config.k,
            ..RelayConfig::default()
        };
        if caps.relay {
            dispatcher.register(
                Command::Relay,
                Arc::new(RelayRpcHandler {
                    dispatcher: Arc::downgrade(&dispatcher),
                    peer_map: Arc::clone(&peer_map),
                    sender: Arc::clone(&sender),
                    wire: network.wire(),
                    config: relay_config.clone(),
                }),
            );
        }

        // Replication observes the map and pushes through the direct path.
        let strategy = replication_strategy
            .unwrap_or_else(|| Arc::new(ConstantReplication(config.replication_factor)));
        let replication = ReplicationController::new(
            Arc::clone(&peer_map),
            Arc::clone(&storage),
            Arc::new(DirectReplicaSender {
                storage: Arc::clone(&storage),
                operations: Arc::clone(&operations),
            }),
            strategy,
            replication_factor,
            ReplicationConfig {
                interval_millis: config.interval_millis,
                delay_millis: config.delay_millis,
            },
        );

        let relay_client = (config.behind_firewall && caps.relay).then(|| {
            RelayClient::new(
                Arc::clone(&peer_map),
                Arc::clone(&sender),
                relay_config,
                address.clone(),
            )
        });

        network.register(&address, Arc::clone(&dispatcher));

        let peer = Arc::new(Self {
            config,
            address,
            network,
            peer_map,
            storage,
            sender,
            dispatcher,
            router,
            operations,
            replication: Arc::clone(&replication),
            relay_client,
            tasks: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        });
        peer.spawn_periodic_tasks(&replication);
        info!(peer = ?peer.address.peer_id, firewalled = peer.config.behind_firewall, "peer assembled");
        peer
    }

    fn spawn_periodic_tasks(self: &Arc<Self>, replication: &Arc<ReplicationController>) {
        let mut tasks = self.tasks.lock().expect("task list poisoned");
        tasks.push(self.storage.spawn_ttl_sweeper());
        tasks.push(replication.spawn_refresh_task());
        if let Some(client) = &self.relay_client {
            tasks.push(client.spawn_maintenance_task());
        }

        // Peer map maintenance: age out overflow, ping the stalest peers,
        // gossip a peer sample. The task holds the peer weakly and dies
        // with it.
        let peer = Arc::downgrade(self);
        let period = Duration::from_millis(self.config.interval_millis.max(1));
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(peer) = peer.upgrade() else {
                    return;
                };
                let report = peer.peer_map.maintenance();
                for candidate in report.ping_candidates {
                    let _ = peer.operations.ping(&candidate).await;
                }
                if peer.config.capabilities.peer_exchange {
                    let sample = peer.peer_map.sample(8);
                    if let Some(target) = peer.peer_map.sample(1).into_iter().next() {
                        let _ = peer
                            .sender
                            .send(
                                &target,
                                Command::PeerExchange,
                                MessageBody::PeerExchange { peers: sample },
                                ChannelKind::Udp,
                            )
                            .await_result()
                            .await;
                    }
                }
            }
        }));
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn peer_id(&self) -> Id160 {
        self.address.peer_id
    }

    /// The currently advertised address (relayed form for firewalled peers).
    pub fn advertised_address(&self) -> PeerAddress {
        self.sender.self_address()
    }

    pub fn peer_map(&self) -> Arc<PeerMapService> {
        Arc::clone(&self.peer_map)
    }

    pub fn storage(&self) -> Arc<StorageLayer> {
        Arc::clone(&self.storage)
    }

    pub fn operations(&self) -> Arc<DhtOperations> {
        Arc::clone(&self.operations)
    }

    pub fn replication(&self) -> Arc<ReplicationController> {
        Arc::clone(&self.replication)
    }

    pub fn relay_client(&self) -> Option<Arc<RelayClient>> {
        self.relay_client.clone()
    }

    fn guard_active<T>(&self) -> Option<Promise<T>> {
        if self.shutdown.load(Ordering::SeqCst) {
            Some(Promise::failed(FailReason::Shutdown))
        } else {
            None
        }
    }

    // =========================================================================
    // Top-level operations (completion handles)
    // =========================================================================

    /// Join the overlay through a known peer: probe it, then discover the
    /// own neighborhood. Firewalled peers set up their relays afterwards.
    /// Resolves to the number of verified peers known once settled.
    pub fn bootstrap(&self, seed: PeerAddress) -> Promise<usize> {
        if let Some(failed) = self.guard_active() {
            return failed;
        }
        let promise: Promise<usize> = Promise::new();
        let completion = promise.clone();
        let operations = Arc::clone(&self.operations);
        let router = Arc::clone(&self.router);
        let peer_map = Arc::clone(&self.peer_map);
        let relay_client = self.relay_client.clone();
        let routing = RoutingConfig {
            alpha: self.config.alpha,
            k: self.config.k,
            max_failures: 3,
            max_no_new_info: None,
            operation: OperationKind::Bootstrap,
        };
        tokio::spawn(async move {
            if let Err(reason) = operations.ping(&seed).await {
                completion.fail(reason);
                return;
            }
            let self_id = peer_map.self_id();
            let _ = router.route_with_seed(self_id, &routing, &[seed]).await;
            if let Some(client) = relay_client {
                if let Err(error) = client.setup().await {
                    debug!(%error, "relay setup during bootstrap failed");
                    let hm_08_relay::RelayError::SetupFailed {
                        established,
                        required,
                    } = error;
                    completion.fail(FailReason::TooFewResults {
                        got: established,
                        required,
                    });
                    return;
                }
            }
            completion.complete(peer_map.stats().verified_count);
        });
        promise
    }

    /// Probe one peer directly.
    pub fn ping(&self, peer: PeerAddress) -> Promise<()> {
        if let Some(failed) = self.guard_active() {
            return failed;
        }
        let promise: Promise<()> = Promise::new();
        let completion = promise.clone();
        let operations = Arc::clone(&self.operations);
        tokio::spawn(async move {
            match operations.ping(&peer).await {
                Ok(()) => completion.complete(()),
                Err(reason) => completion.fail(reason),
            }
        });
        promise
    }

    pub fn put(&self, key: Key640, entry: DataEntry, options: PutOptions) -> Promise<WriteReport> {
        if let Some(failed) = self.guard_active() {
            return failed;
        }
        let promise: Promise<WriteReport> = Promise::new();
        let completion = promise.clone();
        let operations = Arc::clone(&self.operations);
        tokio::spawn(async move {
            let report = operations
                .put(
                    key,
                    entry,
                    options.public_key,
                    options.put_if_absent,
                    options.claim_domain,
                )
                .await;
            completion.complete(report);
        });
        promise
    }

    /// Store under a content key derived from the payload hash. Resolves to
    /// the key used and the write report.
    pub fn add(
        &self,
        location: Id160,
        domain: Id160,
        entry: DataEntry,
        options: PutOptions,
    ) -> Promise<(Key640, WriteReport)> {
        if let Some(failed) = self.guard_active() {
            return failed;
        }
        let promise: Promise<(Key640, WriteReport)> = Promise::new();
        let completion = promise.clone();
        let operations = Arc::clone(&self.operations);
        tokio::spawn(async move {
            let outcome = operations
                .add(location, domain, entry, options.public_key)
                .await;
            completion.complete(outcome);
        });
        promise
    }

    pub fn get(&self, key: Key640) -> Promise<Option<DataEntry>> {
        if let Some(failed) = self.guard_active() {
            return failed;
        }
        let promise: Promise<Option<DataEntry>> = Promise::new();
        let completion = promise.clone();
        let operations = Arc::clone(&self.operations);
        tokio::spawn(async move {
            completion.complete(operations.get(key).await);
        });
        promise
    }

    pub fn remove(&self, key: Key640, public_key: Option<PublicKey>) -> Promise<WriteReport> {
        if let Some(failed) = self.guard_active() {
            return failed;
        }
        let promise: Promise<WriteReport> = Promise::new();
        let completion = promise.clone();
        let operations = Arc::clone(&self.operations);
        tokio::spawn(async move {
            completion.complete(operations.remove(key, public_key).await);
        });
        promise
    }

    pub fn digest(&self, from: Key640, to: Key640) -> Promise<DigestInfo> {
        if let Some(failed) = self.guard_active() {
            return failed;
        }
        let promise: Promise<DigestInfo> = Promise::new();
        let completion = promise.clone();
        let operations = Arc::clone(&self.operations);
        tokio::spawn(async move {
            completion.complete(operations.digest_range(from, to).await);
        });
        promise
    }

    /// Deliver an opaque buffer to the peers closest to `target`.
    pub fn send_direct(
        &self,
        target: Id160,
        payload: Vec<u8>,
        cancel_on_finish: bool,
    ) -> Promise<Vec<Id160>> {
        if let Some(failed) = self.guard_active() {
            return failed;
        }
        let promise: Promise<Vec<Id160>> = Promise::new();
        let completion = promise.clone();
        let operations = Arc::clone(&self.operations);
        tokio::spawn(async move {
            match operations.send_direct(target, payload, cancel_on_finish).await {
                Ok(acked) => completion.complete(acked),
                Err(reason) => completion.fail(reason),
            }
        });
        promise
    }

    /// Stream payload chunks to the peers closest to `target`, invoking
    /// `on_progress(done, total)` as chunks settle.
    pub fn send_direct_streamed(
        &self,
        target: Id160,
        chunks: Vec<Vec<u8>>,
        on_progress: impl FnMut(usize, usize) + Send + 'static,
    ) -> Promise<Vec<Id160>> {
        if let Some(failed) = self.guard_active() {
            return failed;
        }
        let promise: Promise<Vec<Id160>> = Promise::new();
        let completion = promise.clone();
        let operations = Arc::clone(&self.operations);
        tokio::spawn(async move {
            match operations
                .send_direct_streamed(target, chunks, on_progress)
                .await
            {
                Ok(acked) => completion.complete(acked),
                Err(reason) => completion.fail(reason),
            }
        });
        promise
    }

    /// Originate a broadcast; resolves to the broadcast id.
    pub fn broadcast(&self, payload: Vec<u8>) -> Promise<Id160> {
        if let Some(failed) = self.guard_active() {
            return failed;
        }
        let promise: Promise<Id160> = Promise::new();
        match self.operations.broadcast(&payload) {
            Ok(id) => promise.complete(id),
            Err(reason) => promise.fail(reason),
        }
        promise
    }

    /// Leave the overlay: announce QUIT, stop periodic tasks, close permit
    /// pools, detach from the network. Pending operations fail with the
    /// shared shutting-down sentinel. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(peer = ?self.address.peer_id, "shutting down");

        if self.config.capabilities.quit {
            let quits: Vec<Promise<Message>> = self
                .peer_map
                .all()
                .iter()
                .map(|peer| {
                    self.sender
                        .send(peer, Command::Quit, MessageBody::Empty, ChannelKind::Udp)
                })
                .collect();
            // Best effort: give the announcements a short budget.
            let _ = tokio::time::timeout(Duration::from_millis(250), async {
                for quit in &quits {
                    let _ = quit.await_result().await;
                }
            })
            .await;
        }

        // Reverse of assembly: tasks, dispatch, send path, network.
        for task in self.tasks.lock().expect("task list poisoned").drain(..) {
            task.abort();
        }
        self.dispatcher.shutdown();
        self.sender.shutdown();
        self.network.unregister(&self.address.peer_id);
    }
}
