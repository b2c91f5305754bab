//! Relay configuration.

/// Knobs of the relay subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Upper bound on concurrent relay connections.
    pub max_relays: usize,
    /// Setup fails below this many established relays.
    pub min_relays: usize,
    /// Result size when a relay answers NEIGHBORS on behalf of its client.
    pub neighbors_k: usize,
    /// Period of the relay maintenance task on unreachable peers.
    pub maintenance_interval_millis: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_relays: 5,
            min_relays: 1,
            neighbors_k: 20,
            maintenance_interval_millis: 15_000,
        }
    }
}

impl RelayConfig {
    pub fn for_testing() -> Self {
        Self {
            max_relays: 2,
            min_relays: 1,
            neighbors_k: 8,
            maintenance_interval_millis: 100,
        }
    }
}
