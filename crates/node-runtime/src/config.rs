//! Peer configuration.
//!
//! One plain record with every knob of the node, validated defaults, and
//! capability toggles. A disabled capability's RPC handler is simply never
//! registered, which makes the corresponding distributed operation
//! unavailable network-wide for this peer.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// RPC capability toggles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub ping: bool,
    pub storage: bool,
    pub neighbors: bool,
    pub direct_data: bool,
    pub quit: bool,
    pub peer_exchange: bool,
    pub broadcast: bool,
    pub relay: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            ping: true,
            storage: true,
            neighbors: true,
            direct_data: true,
            quit: true,
            peer_exchange: true,
            broadcast: true,
            relay: true,
        }
    }
}

/// All tunables of one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// Replicas per key.
    pub replication_factor: usize,
    /// Verified slots per peer map bucket.
    pub bag_size: usize,
    /// TTL sweep period.
    pub storage_interval_millis: u64,
    /// Replication refresh period.
    pub interval_millis: u64,
    /// Jitter bound for delayed responsibility transfers.
    pub delay_millis: u64,
    /// Routing parallelism.
    pub alpha: usize,
    /// Routing result size.
    pub k: usize,
    /// Channel permit pool sizes.
    pub max_permits_permanent_tcp: usize,
    pub max_permits_tcp: usize,
    pub max_permits_udp: usize,
    /// Per-RPC idle budget.
    pub idle_timeout_millis: u64,
    /// The peer cannot accept incoming connections and must relay.
    pub behind_firewall: bool,
    /// Relay connection bounds.
    pub max_relays: usize,
    pub min_relays: usize,
    pub capabilities: Capabilities,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            replication_factor: 6,
            bag_size: 2,
            storage_interval_millis: 60_000,
            interval_millis: 60_000,
            delay_millis: 30_000,
            alpha: 3,
            k: 20,
            max_permits_permanent_tcp: 250,
            max_permits_tcp: 250,
            max_permits_udp: 250,
            idle_timeout_millis: 5_000,
            behind_firewall: false,
            max_relays: 5,
            min_relays: 1,
            capabilities: Capabilities::default(),
        }
    }
}

impl PeerConfig {
    /// Small limits and short periods for tests.
    pub fn for_testing() -> Self {
        Self {
            replication_factor: 3,
            storage_interval_millis: 100,
            interval_millis: 200,
            delay_millis: 10,
            alpha: 2,
            k: 8,
            idle_timeout_millis: 500,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replication_factor == 0 {
            return Err(ConfigError::Invalid("replication_factor must be positive"));
        }
        if self.bag_size == 0 {
            return Err(ConfigError::Invalid("bag_size must be positive"));
        }
        if self.alpha == 0 {
            return Err(ConfigError::Invalid("alpha must be positive"));
        }
        if self.k < self.replication_factor {
            return Err(ConfigError::Invalid(
                "k must be at least the replication factor",
            ));
        }
        if self.max_relays == 0 || self.min_relays > self.max_relays {
            return Err(ConfigError::Invalid(
                "relay bounds must satisfy 1 <= min_relays <= max_relays",
            ));
        }
        Ok(())
    }
}
