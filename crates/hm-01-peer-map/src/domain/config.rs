//! Peer map configuration.

/// Tuning knobs for the bucketed peer map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMapConfig {
    /// Verified slots per bucket; the overflow bag has the same capacity.
    pub bag_size: usize,
    /// Consecutive offline reports before a verified peer is dropped.
    pub offline_count_max: u8,
    /// Overflow entries unseen for this long are aged out by maintenance.
    pub overflow_timeout_millis: u64,
    /// How many stale verified peers one maintenance pass nominates for a
    /// liveness ping.
    pub max_ping_candidates: usize,
    /// A verified peer unseen for this long becomes a ping candidate.
    pub stale_after_millis: u64,
}

impl Default for PeerMapConfig {
    fn default() -> Self {
        Self {
            bag_size: 2,
            offline_count_max: 3,
            overflow_timeout_millis: 300_000,
            max_ping_candidates: 4,
            stale_after_millis: 120_000,
        }
    }
}

impl PeerMapConfig {
    /// Config with small limits and short timeouts for tests.
    pub fn for_testing() -> Self {
        Self {
            bag_size: 2,
            offline_count_max: 2,
            overflow_timeout_millis: 1_000,
            max_ping_candidates: 2,
            stale_after_millis: 500,
        }
    }
}
