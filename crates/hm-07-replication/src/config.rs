//! Replication configuration and the replication-factor strategy.

/// Timing knobs of the replication controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationConfig {
    /// Period of the refresh sweep.
    pub interval_millis: u64,
    /// Upper bound of the random jitter applied to delayed transfers.
    pub delay_millis: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            interval_millis: 60_000,
            delay_millis: 30_000,
        }
    }
}

impl ReplicationConfig {
    pub fn for_testing() -> Self {
        Self {
            interval_millis: 100,
            delay_millis: 10,
        }
    }
}

/// Chooses the replication factor from the observed network size. Refreshed
/// once per sweep so R can adapt as the overlay grows or shrinks.
pub trait ReplicationStrategy: Send + Sync {
    fn replication_factor(&self, verified_peers: usize) -> usize;
}

/// Fixed replication factor.
#[derive(Debug, Clone, Copy)]
pub struct ConstantReplication(pub usize);

impl ReplicationStrategy for ConstantReplication {
    fn replication_factor(&self, _verified_peers: usize) -> usize {
        self.0.max(1)
    }
}

/// Grows R slowly with the network, bounded on both ends. Small overlays
/// replicate everywhere they can; large ones cap the fan-out.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveReplication {
    pub min: usize,
    pub max: usize,
}

impl ReplicationStrategy for AdaptiveReplication {
    fn replication_factor(&self, verified_peers: usize) -> usize {
        (1 + verified_peers / 10).clamp(self.min.max(1), self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_strategy_never_returns_zero() {
        assert_eq!(ConstantReplication(0).replication_factor(100), 1);
        assert_eq!(ConstantReplication(6).replication_factor(0), 6);
    }

    #[test]
    fn test_adaptive_strategy_clamps() {
        let strategy = AdaptiveReplication { min: 2, max: 8 };
        assert_eq!(strategy.replication_factor(0), 2);
        assert_eq!(strategy.replication_factor(40), 5);
        assert_eq!(strategy.replication_factor(1_000), 8);
    }
}
