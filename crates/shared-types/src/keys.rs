//! Composite storage keys.
//!
//! A stored entry is addressed by four 160-bit coordinates: location, domain,
//! content and version. The prefixes of that tuple are themselves keys used
//! for range scans and lock selection, so each width gets its own type.
//! Ordering is lexicographic on the components, which makes `BTreeMap` range
//! scans line up with key prefixes.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::errors::DecodeError;
use crate::id::Id160;

/// `(location, domain)` — addresses one domain branch of a location.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Key320 {
    pub location: Id160,
    pub domain: Id160,
}

/// `(location, domain, content)` — addresses all versions of one content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Key480 {
    pub location: Id160,
    pub domain: Id160,
    pub content: Id160,
}

/// `(location, domain, content, version)` — addresses exactly one entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key640 {
    pub location: Id160,
    pub domain: Id160,
    pub content: Id160,
    pub version: Id160,
}

impl Key320 {
    pub fn new(location: Id160, domain: Id160) -> Self {
        Self { location, domain }
    }

    /// Smallest 640-bit key inside this branch.
    pub fn range_start(&self) -> Key640 {
        Key640::new(self.location, self.domain, Id160::ZERO, Id160::ZERO)
    }

    /// Largest 640-bit key inside this branch.
    pub fn range_end(&self) -> Key640 {
        Key640::new(self.location, self.domain, Id160::MAX, Id160::MAX)
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        self.location.encode(buf);
        self.domain.encode(buf);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(Self {
            location: Id160::decode(buf)?,
            domain: Id160::decode(buf)?,
        })
    }
}

impl Key480 {
    pub fn new(location: Id160, domain: Id160, content: Id160) -> Self {
        Self {
            location,
            domain,
            content,
        }
    }

    pub fn key320(&self) -> Key320 {
        Key320::new(self.location, self.domain)
    }

    /// Smallest 640-bit key sharing this content prefix.
    pub fn range_start(&self) -> Key640 {
        Key640::new(self.location, self.domain, self.content, Id160::ZERO)
    }

    /// Largest 640-bit key sharing this content prefix.
    pub fn range_end(&self) -> Key640 {
        Key640::new(self.location, self.domain, self.content, Id160::MAX)
    }
}

impl Key640 {
    pub fn new(location: Id160, domain: Id160, content: Id160, version: Id160) -> Self {
        Self {
            location,
            domain,
            content,
            version,
        }
    }

    /// A key with only the location coordinate set.
    pub fn from_location(location: Id160) -> Self {
        Self::new(location, Id160::ZERO, Id160::ZERO, Id160::ZERO)
    }

    pub fn key320(&self) -> Key320 {
        Key320::new(self.location, self.domain)
    }

    pub fn key480(&self) -> Key480 {
        Key480::new(self.location, self.domain, self.content)
    }

    /// Full range of keys sharing this key's location.
    pub fn location_range(location: Id160) -> (Key640, Key640) {
        (
            Key640::new(location, Id160::ZERO, Id160::ZERO, Id160::ZERO),
            Key640::new(location, Id160::MAX, Id160::MAX, Id160::MAX),
        )
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        self.location.encode(buf);
        self.domain.encode(buf);
        self.content.encode(buf);
        self.version.encode(buf);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(Self {
            location: Id160::decode(buf)?,
            domain: Id160::decode(buf)?,
            content: Id160::decode(buf)?,
            version: Id160::decode(buf)?,
        })
    }
}

impl fmt::Debug for Key640 {
    // Compact form: the four coordinates separated by slashes, readable in
    // log lines.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Key640({:?}/{:?}/{:?}/{:?})",
            self.location, self.domain, self.content, self.version
        )
    }
}

/// The lock a range operation must take so no other writer can touch the
/// covered branch: the coarsest shared prefix of `from` and `to`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LockFootprint {
    /// Point operation on exactly one key.
    Exact(Key640),
    /// All four versions of one content.
    Content(Key480),
    /// One domain branch.
    Domain(Key320),
    /// One whole location.
    Location(Id160),
    /// The components span locations; only the storage-wide lock covers it.
    Global,
}

impl LockFootprint {
    /// Pick the narrowest lock whose prefix fully covers `from..=to`.
    pub fn for_range(from: &Key640, to: &Key640) -> Self {
        if from == to {
            return LockFootprint::Exact(*from);
        }
        if from.location != to.location {
            return LockFootprint::Global;
        }
        if from.domain != to.domain {
            return LockFootprint::Location(from.location);
        }
        if from.content != to.content {
            return LockFootprint::Domain(from.key320());
        }
        LockFootprint::Content(from.key480())
    }
}
