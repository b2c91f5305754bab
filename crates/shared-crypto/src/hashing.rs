//! SHA-1 hashing into the 160-bit identifier space.
//!
//! The overlay's address space is exactly one SHA-1 digest wide, so hashing
//! is how payloads, public keys and human-readable names become identifiers.

use sha1::{Digest, Sha1};
use shared_types::Id160;

/// Hash arbitrary bytes to an identifier.
pub fn hash_bytes(data: &[u8]) -> Id160 {
    let mut hasher = Sha1::new();
    hasher.update(data);
    Id160::new(hasher.finalize().into())
}

/// Hash a UTF-8 string to an identifier (location keys from names).
pub fn hash_str(value: &str) -> Id160 {
    hash_bytes(value.as_bytes())
}

/// Incremental hasher for large payloads.
///
/// Hashing a multi-megabyte payload should not require one contiguous
/// buffer; the codec feeds chunks as they arrive.
#[derive(Default)]
pub struct IncrementalHasher {
    inner: Sha1,
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finish(self) -> Id160 {
        Id160::new(self.inner.finalize().into())
    }
}
