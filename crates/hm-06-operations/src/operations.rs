//! Distributed operations.
//!
//! All operations share one shape: route iteratively to the location key,
//! fan the storage RPC out to the replica set (the R closest peers, the
//! local peer included when it ranks there), then vote the raw per-peer
//! results into one answer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hm_01_peer_map::{FailureKind, PeerMapService};
use hm_02_storage::{
    DataEntry, DigestInfo, RemoveOutcome, StorageLayer, StorageResult,
};
use hm_04_rpc::{
    late_join, ChannelKind, Command, FailReason, Message, MessageBody, Promise, RequestSender,
    StoreRequest, StoreResponse,
};
use hm_05_routing::{IterativeRouter, OperationKind, RoutingConfig};
use shared_crypto::PublicKey;
use shared_types::{Id160, Key320, Key640, PeerAddress, SimpleBloomFilter};
use tracing::debug;

use crate::broadcast::BroadcastDispatcher;
use crate::voting::{evaluate_digests, evaluate_entries};

/// Routing knobs shared by all operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationsConfig {
    pub alpha: usize,
    pub k: usize,
    pub max_failures: usize,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            alpha: 3,
            k: 20,
            max_failures: 3,
        }
    }
}

impl OperationsConfig {
    pub fn for_testing() -> Self {
        Self {
            alpha: 2,
            k: 4,
            max_failures: 2,
        }
    }
}

/// Per-replica outcome of a write-side operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub results: Vec<(Id160, StorageResult)>,
    /// Replicas the operation was attempted on (including unanswered ones).
    pub attempted: usize,
}

impl WriteReport {
    pub fn ok_count(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    /// True when a strict majority of attempted replicas acknowledged.
    pub fn majority_ok(&self) -> bool {
        self.attempted > 0 && self.ok_count() * 2 > self.attempted
    }

    /// True when at least one replica acknowledged.
    pub fn any_ok(&self) -> bool {
        self.ok_count() > 0
    }

    /// The most telling non-ok status, for surfacing denial reasons.
    pub fn first_error(&self) -> Option<StorageResult> {
        self.results.iter().map(|(_, r)| *r).find(|r| !r.is_ok())
    }
}

/// The distributed hash table operations of one peer.
pub struct DhtOperations {
    peer_map: Arc<PeerMapService>,
    storage: Arc<StorageLayer>,
    sender: Arc<RequestSender>,
    router: Arc<IterativeRouter>,
    broadcast: Arc<BroadcastDispatcher>,
    replication_factor: Arc<AtomicUsize>,
    config: OperationsConfig,
}

impl DhtOperations {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer_map: Arc<PeerMapService>,
        storage: Arc<StorageLayer>,
        sender: Arc<RequestSender>,
        router: Arc<IterativeRouter>,
        broadcast: Arc<BroadcastDispatcher>,
        replication_factor: Arc<AtomicUsize>,
        config: OperationsConfig,
    ) -> Self {
        Self {
            peer_map,
            storage,
            sender,
            router,
            broadcast,
            replication_factor,
            config,
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor.load(Ordering::SeqCst).max(1)
    }

    pub fn storage(&self) -> Arc<StorageLayer> {
        Arc::clone(&self.storage)
    }

    fn routing_config(&self, operation: OperationKind) -> RoutingConfig {
        RoutingConfig {
            alpha: self.config.alpha,
            k: self.config.k,
            max_failures: self.config.max_failures,
            max_no_new_info: None,
            operation,
        }
    }

    /// Route to `location` and pick the replica set: the R closest peers,
    /// with the local peer claiming a slot when it ranks among them.
    async fn replica_set(
        &self,
        location: Id160,
        operation: OperationKind,
    ) -> (Vec<PeerAddress>, bool) {
        let result = self
            .router
            .route_to_closest(location, &self.routing_config(operation))
            .await;
        let r = self.replication_factor();
        let self_id = self.peer_map.self_id();
        let self_distance = self_id.distance(&location);

        let mut remotes = result.closest;
        remotes.truncate(r);
        let closer_remotes = remotes
            .iter()
            .filter(|peer| peer.peer_id.distance(&location) < self_distance)
            .count();
        let self_included = closer_remotes < r;
        if self_included && remotes.len() == r {
            remotes.pop();
        }
        (remotes, self_included)
    }

    fn send_store(&self, peer: &PeerAddress, request: StoreRequest) -> Promise<Message> {
        self.sender.send(
            peer,
            Command::Store,
            MessageBody::Store(request),
            ChannelKind::Tcp,
        )
    }

    async fn collect_status(
        &self,
        pending: Vec<(Id160, Promise<Message>)>,
        results: &mut Vec<(Id160, StorageResult)>,
    ) {
        for (peer_id, promise) in pending {
            match promise.await_result().await {
                Ok(message) => match message.body {
                    MessageBody::StoreOutcome(StoreResponse::Status(status)) => {
                        results.push((peer_id, status));
                    }
                    _ => results.push((peer_id, StorageResult::Failed)),
                },
                Err(_) => {
                    self.peer_map
                        .report_failure(&peer_id, FailureKind::Transient);
                }
            }
        }
    }

    async fn collect_entries(
        &self,
        pending: Vec<(Id160, Promise<Message>)>,
        raw: &mut Vec<BTreeMap<Key640, DataEntry>>,
    ) {
        for (peer_id, promise) in pending {
            match promise.await_result().await {
                Ok(message) => {
                    if let MessageBody::StoreOutcome(StoreResponse::Entries(entries)) = message.body
                    {
                        raw.push(entries);
                    }
                }
                Err(_) => {
                    self.peer_map
                        .report_failure(&peer_id, FailureKind::Transient);
                }
            }
        }
    }

    // =========================================================================
    // PUT / ADD
    // =========================================================================

    /// Store an entry on the replica set of its location.
    pub async fn put(
        &self,
        key: Key640,
        entry: DataEntry,
        public_key: Option<PublicKey>,
        put_if_absent: bool,
        claim_domain: bool,
    ) -> WriteReport {
        let (remotes, self_included) = self.replica_set(key.location, OperationKind::Put).await;
        let mut pending = Vec::new();
        for peer in &remotes {
            let request = StoreRequest::Put {
                key,
                entry: entry.clone(),
                public_key: public_key.clone(),
                put_if_absent,
                claim_domain,
            };
            pending.push((peer.peer_id, self.send_store(peer, request)));
        }

        let mut results = Vec::new();
        if self_included {
            let status = self
                .storage
                .put(key, entry, public_key.as_ref(), put_if_absent, claim_domain)
                .await;
            results.push((self.peer_map.self_id(), status));
        }
        let attempted = remotes.len() + usize::from(self_included);
        self.collect_status(pending, &mut results).await;

        debug!(?key, ok = results.iter().filter(|(_, r)| r.is_ok()).count(), attempted, "put settled");
        WriteReport { results, attempted }
    }

    /// Store an entry under a content key derived from its payload hash.
    /// Returns the key actually used alongside the report.
    pub async fn add(
        &self,
        location: Id160,
        domain: Id160,
        entry: DataEntry,
        public_key: Option<PublicKey>,
    ) -> (Key640, WriteReport) {
        let key = Key640::new(location, domain, entry.content_hash(), Id160::ZERO);
        let report = self.put(key, entry, public_key, false, false).await;
        (key, report)
    }

    // =========================================================================
    // GET
    // =========================================================================

    /// Read one entry, voting across the replica set.
    pub async fn get(&self, key: Key640) -> Option<DataEntry> {
        let (remotes, self_included) = self.replica_set(key.location, OperationKind::Get).await;
        let mut pending = Vec::new();
        for peer in &remotes {
            pending.push((peer.peer_id, self.send_store(peer, StoreRequest::Get { key })));
        }

        let mut raw = Vec::new();
        if self_included {
            let mut local = BTreeMap::new();
            if let Some(entry) = self.storage.get(key).await {
                local.insert(key, entry);
            }
            raw.push(local);
        }
        self.collect_entries(pending, &mut raw).await;
        evaluate_entries(&raw).remove(&key)
    }

    /// Read a range, voting per key.
    pub async fn get_range(
        &self,
        from: Key640,
        to: Key640,
        key_bloom: Option<SimpleBloomFilter>,
        content_bloom: Option<SimpleBloomFilter>,
    ) -> BTreeMap<Key640, DataEntry> {
        let (remotes, self_included) = self.replica_set(from.location, OperationKind::Get).await;
        let mut pending = Vec::new();
        for peer in &remotes {
            let request = StoreRequest::GetRange {
                from,
                to,
                key_bloom: key_bloom.clone(),
                content_bloom: content_bloom.clone(),
            };
            pending.push((peer.peer_id, self.send_store(peer, request)));
        }

        let mut raw = Vec::new();
        if self_included {
            raw.push(
                self.storage
                    .get_range_filtered(from, to, key_bloom.as_ref(), content_bloom.as_ref())
                    .await,
            );
        }
        self.collect_entries(pending, &mut raw).await;
        evaluate_entries(&raw)
    }

    // =========================================================================
    // REMOVE
    // =========================================================================

    pub async fn remove(&self, key: Key640, public_key: Option<PublicKey>) -> WriteReport {
        let (remotes, self_included) =
            self.replica_set(key.location, OperationKind::Remove).await;
        let mut pending = Vec::new();
        for peer in &remotes {
            let request = StoreRequest::Remove {
                key,
                public_key: public_key.clone(),
            };
            pending.push((peer.peer_id, self.send_store(peer, request)));
        }

        let mut results = Vec::new();
        if self_included {
            let status = match self.storage.remove(key, public_key.as_ref()).await {
                RemoveOutcome::Removed(_) => StorageResult::Ok,
                RemoveOutcome::NotFound => StorageResult::Failed,
                RemoveOutcome::Denied => StorageResult::FailedSecurity,
            };
            results.push((self.peer_map.self_id(), status));
        }
        let attempted = remotes.len() + usize::from(self_included);
        self.collect_status(pending, &mut results).await;
        WriteReport { results, attempted }
    }

    /// Remove a range everywhere; returns the union of what the replicas
    /// reported removed.
    pub async fn remove_range(
        &self,
        from: Key640,
        to: Key640,
        public_key: Option<PublicKey>,
    ) -> BTreeMap<Key640, DataEntry> {
        let (remotes, self_included) =
            self.replica_set(from.location, OperationKind::Remove).await;
        let mut pending = Vec::new();
        for peer in &remotes {
            let request = StoreRequest::RemoveRange {
                from,
                to,
                public_key: public_key.clone(),
            };
            pending.push((peer.peer_id, self.send_store(peer, request)));
        }

        let mut removed = BTreeMap::new();
        if self_included {
            removed.extend(self.storage.remove_range(from, to, public_key.as_ref()).await);
        }
        let mut raw = Vec::new();
        self.collect_entries(pending, &mut raw).await;
        for response in raw {
            removed.extend(response);
        }
        removed
    }

    // =========================================================================
    // DIGEST
    // =========================================================================

    async fn digest_with(
        &self,
        location: Id160,
        build: impl Fn() -> StoreRequest,
        local: DigestInfo,
    ) -> DigestInfo {
        let (remotes, self_included) = self.replica_set(location, OperationKind::Digest).await;
        let mut pending = Vec::new();
        for peer in &remotes {
            pending.push((peer.peer_id, self.send_store(peer, build())));
        }

        let mut raw = Vec::new();
        if self_included {
            raw.push(local);
        }
        for (peer_id, promise) in pending {
            match promise.await_result().await {
                Ok(message) => {
                    if let MessageBody::StoreOutcome(StoreResponse::Digest(digest)) = message.body {
                        raw.push(digest);
                    }
                }
                Err(_) => {
                    self.peer_map
                        .report_failure(&peer_id, FailureKind::Transient);
                }
            }
        }
        evaluate_digests(&raw)
    }

    pub async fn digest_range(&self, from: Key640, to: Key640) -> DigestInfo {
        let local = self.storage.digest_range(from, to).await;
        self.digest_with(from.location, || StoreRequest::DigestRange { from, to }, local)
            .await
    }

    pub async fn digest_bloom(
        &self,
        branch: Key320,
        key_bloom: Option<SimpleBloomFilter>,
        content_bloom: Option<SimpleBloomFilter>,
    ) -> DigestInfo {
        let local = self
            .storage
            .digest_filtered(branch, key_bloom.as_ref(), content_bloom.as_ref())
            .await;
        self.digest_with(
            branch.location,
            || StoreRequest::DigestBloom {
                branch,
                key_bloom: key_bloom.clone(),
                content_bloom: content_bloom.clone(),
            },
            local,
        )
        .await
    }

    pub async fn digest_keys(&self, keys: Vec<Key640>) -> DigestInfo {
        let location = keys.first().map(|k| k.location).unwrap_or(Id160::ZERO);
        let local = self.storage.digest_keys(&keys).await;
        self.digest_with(
            location,
            || StoreRequest::DigestKeys { keys: keys.clone() },
            local,
        )
        .await
    }

    // =========================================================================
    // SEND-DIRECT / BROADCAST / PING
    // =========================================================================

    /// Deliver an opaque buffer to the peers closest to `target`. With
    /// `cancel_on_finish`, the first acknowledgment wins and the remaining
    /// sends are cancelled.
    pub async fn send_direct(
        &self,
        target: Id160,
        payload: Vec<u8>,
        cancel_on_finish: bool,
    ) -> Result<Vec<Id160>, FailReason> {
        if payload.is_empty() {
            return Err(FailReason::IllegalArgument(
                "direct send with empty payload".into(),
            ));
        }
        let (remotes, _) = self.replica_set(target, OperationKind::Send).await;
        if remotes.is_empty() {
            return Err(FailReason::TooFewResults {
                got: 0,
                required: 1,
            });
        }

        let pending: Vec<(Id160, Promise<Message>)> = remotes
            .iter()
            .map(|peer| {
                (
                    peer.peer_id,
                    self.sender.send(
                        peer,
                        Command::Direct,
                        MessageBody::Direct {
                            payload: payload.clone(),
                        },
                        ChannelKind::Tcp,
                    ),
                )
            })
            .collect();

        if cancel_on_finish {
            // First acknowledgment wins; everything else is cancelled and
            // its channel released.
            let acks: Vec<Promise<Id160>> = pending
                .iter()
                .map(|(peer_id, promise)| {
                    let ack: Promise<Id160> = Promise::new();
                    let completion = ack.clone();
                    let peer_id = *peer_id;
                    promise.add_listener(move |result| match result {
                        Ok(_) => completion.complete(peer_id),
                        Err(reason) => completion.fail(reason.clone()),
                    });
                    ack
                })
                .collect();
            let first = late_join(acks, 1).await_result().await?;
            for (_, promise) in &pending {
                promise.cancel();
            }
            return Ok(first);
        }

        let mut acked = Vec::new();
        for (peer_id, promise) in &pending {
            match promise.await_result().await {
                Ok(_) => acked.push(*peer_id),
                Err(_) => {
                    self.peer_map.report_failure(peer_id, FailureKind::Transient);
                }
            }
        }
        if acked.is_empty() {
            return Err(FailReason::TooFewResults {
                got: 0,
                required: 1,
            });
        }
        Ok(acked)
    }

    /// Stream payload chunks to the peers closest to `target`, pipelining
    /// chunk by chunk. `on_progress(done, total)` fires after every chunk
    /// acknowledged by at least one replica. Returns the peers that
    /// acknowledged every chunk; chunk reassembly is the receiving
    /// application's concern, the payload being opaque.
    pub async fn send_direct_streamed(
        &self,
        target: Id160,
        chunks: Vec<Vec<u8>>,
        mut on_progress: impl FnMut(usize, usize) + Send,
    ) -> Result<Vec<Id160>, FailReason> {
        if chunks.is_empty() || chunks.iter().any(|c| c.is_empty()) {
            return Err(FailReason::IllegalArgument(
                "streamed send needs non-empty chunks".into(),
            ));
        }
        let (remotes, _) = self.replica_set(target, OperationKind::Send).await;
        if remotes.is_empty() {
            return Err(FailReason::TooFewResults {
                got: 0,
                required: 1,
            });
        }

        let total = chunks.len();
        let mut complete: Vec<Id160> = remotes.iter().map(|p| p.peer_id).collect();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let pending: Vec<(Id160, Promise<Message>)> = remotes
                .iter()
                .filter(|peer| complete.contains(&peer.peer_id))
                .map(|peer| {
                    (
                        peer.peer_id,
                        self.sender.send(
                            peer,
                            Command::Direct,
                            MessageBody::Direct {
                                payload: chunk.clone(),
                            },
                            ChannelKind::PermanentTcp,
                        ),
                    )
                })
                .collect();
            let mut acked_this_chunk = Vec::new();
            for (peer_id, promise) in pending {
                match promise.await_result().await {
                    Ok(_) => acked_this_chunk.push(peer_id),
                    Err(_) => {
                        self.peer_map
                            .report_failure(&peer_id, FailureKind::Transient);
                    }
                }
            }
            complete.retain(|peer_id| acked_this_chunk.contains(peer_id));
            if complete.is_empty() {
                return Err(FailReason::TooFewResults {
                    got: 0,
                    required: 1,
                });
            }
            on_progress(index + 1, total);
        }
        Ok(complete)
    }

    /// Originate a broadcast.
    pub fn broadcast(&self, payload: &[u8]) -> Result<Id160, FailReason> {
        self.broadcast.originate(payload)
    }

    /// Direct liveness probe.
    pub async fn ping(&self, peer: &PeerAddress) -> Result<(), FailReason> {
        let response = self
            .sender
            .send(peer, Command::Ping, MessageBody::Empty, ChannelKind::Udp)
            .await_result()
            .await?;
        if response.is_ok() {
            let _ = self.peer_map.add(response.sender, true);
            Ok(())
        } else {
            self.peer_map
                .report_failure(&peer.peer_id, FailureKind::Offline);
            Err(FailReason::PeerUnreachable)
        }
    }

    /// Push a set of locally held entries straight to one peer (replication
    /// path; no routing).
    pub async fn store_to_peer(
        &self,
        peer: &PeerAddress,
        entries: BTreeMap<Key640, DataEntry>,
    ) -> usize {
        let mut pending = Vec::new();
        for (key, entry) in entries {
            let request = StoreRequest::Put {
                key,
                entry,
                public_key: None,
                put_if_absent: false,
                claim_domain: false,
            };
            pending.push((peer.peer_id, self.send_store(peer, request)));
        }
        let mut results = Vec::new();
        self.collect_status(pending, &mut results).await;
        results.iter().filter(|(_, r)| r.is_ok()).count()
    }
}
