//! Storage configuration.

/// Who may protect a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionEnable {
    /// Anyone holding a key may protect.
    All,
    /// Only identity-proving keys (`SHA-1(key) == coordinate`) may protect.
    None,
}

/// Tuning knobs for the storage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Who may claim a `(location, domain)` pair.
    pub domain_protection: ProtectionEnable,
    /// Who may set the per-entry protection bit.
    pub entry_protection: ProtectionEnable,
    /// Period of the TTL sweep.
    pub check_interval_millis: u64,
    /// Upper bound on a `based_on` ancestry walk; longer chains are treated
    /// as conflicts.
    pub max_version_walk: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            domain_protection: ProtectionEnable::All,
            entry_protection: ProtectionEnable::All,
            check_interval_millis: 60_000,
            max_version_walk: 128,
        }
    }
}

impl StorageConfig {
    pub fn for_testing() -> Self {
        Self {
            check_interval_millis: 100,
            max_version_walk: 16,
            ..Self::default()
        }
    }
}
