//! Storage operation results and digests.

use std::collections::BTreeMap;
use std::fmt;

use shared_types::{Id160, Key640};

/// Outcome of a write-side storage operation; travels on the wire as one
/// byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageResult {
    Ok,
    /// `put_if_absent` found a live entry in the way.
    FailedNotAbsent,
    /// Domain or entry protection denied the write.
    FailedSecurity,
    /// Generic failure (malformed input, internal error).
    Failed,
    /// The version ancestry was inconsistent (unknown or cyclic `based_on`).
    VersionConflict,
}

impl StorageResult {
    pub fn code(&self) -> u8 {
        match self {
            StorageResult::Ok => 0,
            StorageResult::FailedNotAbsent => 1,
            StorageResult::FailedSecurity => 2,
            StorageResult::Failed => 3,
            StorageResult::VersionConflict => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(StorageResult::Ok),
            1 => Some(StorageResult::FailedNotAbsent),
            2 => Some(StorageResult::FailedSecurity),
            3 => Some(StorageResult::Failed),
            4 => Some(StorageResult::VersionConflict),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StorageResult::Ok)
    }
}

impl fmt::Display for StorageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageResult::Ok => write!(f, "ok"),
            StorageResult::FailedNotAbsent => write!(f, "failed: entry present"),
            StorageResult::FailedSecurity => write!(f, "failed: protection denied"),
            StorageResult::Failed => write!(f, "failed"),
            StorageResult::VersionConflict => write!(f, "failed: version conflict"),
        }
    }
}

/// A `(key → content hash)` map: enough to compare replica contents without
/// moving payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestInfo {
    pub entries: BTreeMap<Key640, Id160>,
}

impl DigestInfo {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys present here but absent or differing in `other`.
    pub fn missing_in(&self, other: &DigestInfo) -> Vec<Key640> {
        self.entries
            .iter()
            .filter(|(key, hash)| other.entries.get(*key) != Some(*hash))
            .map(|(key, _)| *key)
            .collect()
    }
}

/// Outcome of a remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The entry was removed and returned.
    Removed(Box<super::entry::DataEntry>),
    /// Nothing stored under the key.
    NotFound,
    /// Protection denied the removal.
    Denied,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes_round_trip() {
        for result in [
            StorageResult::Ok,
            StorageResult::FailedNotAbsent,
            StorageResult::FailedSecurity,
            StorageResult::Failed,
            StorageResult::VersionConflict,
        ] {
            assert_eq!(StorageResult::from_code(result.code()), Some(result));
        }
        assert_eq!(StorageResult::from_code(99), None);
    }

    #[test]
    fn test_digest_diff() {
        use shared_types::Id160;
        let key = |v: u8| Key640::from_location(Id160::from_low_u8(v));

        let mut mine = DigestInfo::default();
        mine.entries.insert(key(1), Id160::from_low_u8(10));
        mine.entries.insert(key(2), Id160::from_low_u8(20));

        let mut theirs = DigestInfo::default();
        theirs.entries.insert(key(1), Id160::from_low_u8(10));
        theirs.entries.insert(key(2), Id160::from_low_u8(99));

        assert_eq!(mine.missing_in(&theirs), vec![key(2)]);
    }
}
