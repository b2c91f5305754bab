//! # Shared Types
//!
//! Foundation types for the HiveMesh overlay: the 160-bit identifier space
//! with its XOR metric, the composite 320/480/640-bit storage keys, peer
//! addresses with relay metadata, timestamps with an injectable clock, and
//! the bloom filters carried by range queries.
//!
//! Everything here is pure data: no I/O, no clocks read implicitly (the
//! [`TimeSource`] port makes time explicit), deterministic wire encodings.

pub mod bloom;
pub mod errors;
pub mod id;
pub mod keys;
pub mod peer_address;
pub mod timestamp;

pub use bloom::SimpleBloomFilter;
pub use errors::DecodeError;
pub use id::{cmp_by_distance, Id160, ID_BITS, ID_BYTES};
pub use keys::{Key320, Key480, Key640, LockFootprint};
pub use peer_address::{PeerAddress, PeerSocket, MAX_RELAYS};
pub use timestamp::{FixedTimeSource, SystemTimeSource, TimeSource, Timestamp};
