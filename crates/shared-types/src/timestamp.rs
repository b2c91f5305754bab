//! Wall-clock timestamps and the injectable time source.
//!
//! All expiry math runs on millisecond timestamps. Production code reads the
//! system clock; tests inject a `FixedTimeSource` so TTL and maintenance
//! behavior is deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn add_millis(&self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    pub fn add_secs(&self, secs: u64) -> Self {
        self.add_millis(secs.saturating_mul(1000))
    }

    pub fn sub_millis(&self, millis: u64) -> Self {
        Self(self.0.saturating_sub(millis))
    }

    /// Milliseconds from `self` until `later`; 0 if `later` is not later.
    pub fn millis_until(&self, later: Timestamp) -> u64 {
        later.0.saturating_sub(self.0)
    }
}

/// Provider of the current time.
///
/// Implementations must be `Send + Sync`; services hold them behind `Arc`.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Reads the operating-system clock.
#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp::from_millis(since_epoch.as_millis() as u64)
    }
}

/// Settable clock for deterministic tests.
#[derive(Debug, Default)]
pub struct FixedTimeSource {
    millis: AtomicU64,
}

impl FixedTimeSource {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_arithmetic_saturates() {
        let ts = Timestamp::from_millis(1_000);
        assert_eq!(ts.add_secs(2).as_millis(), 3_000);
        assert_eq!(ts.sub_millis(2_000).as_millis(), 0, "subtraction saturates");
        assert_eq!(ts.millis_until(Timestamp::from_millis(1_500)), 500);
        assert_eq!(ts.millis_until(Timestamp::from_millis(500)), 0);
    }

    #[test]
    fn test_fixed_time_source_advances() {
        let clock = FixedTimeSource::new(1_000);
        assert_eq!(clock.now().as_millis(), 1_000);

        clock.advance(250);
        assert_eq!(clock.now().as_millis(), 1_250);

        clock.set(99);
        assert_eq!(clock.now().as_millis(), 99);
    }
}
