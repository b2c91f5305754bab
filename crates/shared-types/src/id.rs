//! 160-bit identifiers and the XOR distance metric.
//!
//! Every addressable thing in the overlay lives in the same 160-bit space:
//! peers, locations, domains, content and version coordinates. Identifiers
//! behave like unsigned big-endian integers for comparison and like bit
//! vectors for the XOR metric.

use std::fmt;

use bytes::{Buf, BufMut};
use rand::Rng;

use crate::errors::DecodeError;

/// Number of bytes in an identifier.
pub const ID_BYTES: usize = 20;

/// Number of bits in an identifier.
pub const ID_BITS: u32 = 160;

/// A 160-bit identifier, ordered as an unsigned big-endian integer.
///
/// `ZERO` and `MAX` are reserved sentinels: `ZERO` marks "unset" coordinates
/// (e.g. the domain of an unqualified key) and the pair bounds range scans.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id160(pub [u8; ID_BYTES]);

impl Id160 {
    /// The all-zero sentinel.
    pub const ZERO: Id160 = Id160([0u8; ID_BYTES]);

    /// The all-ones sentinel (largest possible identifier).
    pub const MAX: Id160 = Id160([0xffu8; ID_BYTES]);

    /// Create an identifier from raw bytes.
    pub fn new(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Create an identifier whose lowest byte is `value`, rest zero.
    ///
    /// Convenient for tests and for small well-known coordinates.
    pub fn from_low_u8(value: u8) -> Self {
        let mut bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - 1] = value;
        Self(bytes)
    }

    /// Create an identifier from a big-endian u64 in the low bytes.
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// Draw a uniformly random identifier.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; ID_BYTES];
        rng.fill(&mut bytes[..]);
        Self(bytes)
    }

    /// Raw bytes, big-endian.
    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// True for the `ZERO` sentinel.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// XOR distance to another identifier.
    pub fn distance(&self, other: &Id160) -> Id160 {
        let mut out = [0u8; ID_BYTES];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.0[i] ^ other.0[i];
        }
        Id160(out)
    }

    /// Position of the highest set bit plus one; 0 for `ZERO`.
    ///
    /// `Id160::MAX.bit_length() == 160`, `Id160::from_low_u8(1) == 1`.
    pub fn bit_length(&self) -> u32 {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                let bits_below = (ID_BYTES - 1 - i) as u32 * 8;
                return bits_below + (8 - byte.leading_zeros());
            }
        }
        0
    }

    /// Write the 20 raw bytes to a wire buffer.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.0);
    }

    /// Read 20 raw bytes from a wire buffer.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        if buf.remaining() < ID_BYTES {
            return Err(DecodeError::UnexpectedEnd("id160"));
        }
        let mut bytes = [0u8; ID_BYTES];
        buf.copy_to_slice(&mut bytes);
        Ok(Self(bytes))
    }
}

impl fmt::Display for Id160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Id160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form: first and last two bytes are enough to tell ids apart
        // in log output.
        write!(
            f,
            "Id160(0x{}..{})",
            hex::encode(&self.0[..2]),
            hex::encode(&self.0[ID_BYTES - 2..])
        )
    }
}

impl AsRef<[u8]> for Id160 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Compare two identifiers by XOR distance from `target`.
///
/// Ties (equal distance can only mean equal ids) break on the numeric order
/// of the identifiers themselves, which keeps sorts total and deterministic.
pub fn cmp_by_distance(a: &Id160, b: &Id160, target: &Id160) -> std::cmp::Ordering {
    a.distance(target)
        .cmp(&b.distance(target))
        .then_with(|| a.cmp(b))
}
