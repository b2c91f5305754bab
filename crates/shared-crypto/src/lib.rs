//! # Shared Crypto
//!
//! The overlay's cryptographic surface: SHA-1 hashing into the 160-bit
//! identifier space, and the signature capability — wire shapes for `(r, s)`
//! signatures and opaque public keys plus the [`SignatureFactory`] port the
//! host implements with its real scheme.
//!
//! `test_utils` ships a deterministic HMAC-based factory for tests; it is
//! not a real signature scheme.

pub mod errors;
pub mod hashing;
pub mod signatures;
pub mod test_utils;

pub use errors::CryptoError;
pub use hashing::{hash_bytes, hash_str, IncrementalHasher};
pub use signatures::{PublicKey, Signature, SignatureFactory};
