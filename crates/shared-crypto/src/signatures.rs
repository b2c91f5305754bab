//! The signature capability.
//!
//! The overlay treats asymmetric cryptography as an external capability: the
//! wire format fixes the *shape* of a signature — two 160-bit integers `(r,
//! s)` — and of a public key — opaque DER bytes with a 2-byte length prefix —
//! while the actual scheme is provided by the host through
//! [`SignatureFactory`]. Signatures always cover the payload bytes only.

use std::fmt;

use bytes::{Buf, BufMut};
use shared_types::{DecodeError, Id160};

use crate::errors::CryptoError;
use crate::hashing::hash_bytes;

/// A detached signature: the `(r, s)` pair as two 160-bit integers.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    pub r: Id160,
    pub s: Id160,
}

impl Signature {
    pub const ENCODED_LEN: usize = 40;

    pub fn new(r: Id160, s: Id160) -> Self {
        Self { r, s }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        self.r.encode(buf);
        self.s.encode(buf);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(Self {
            r: Id160::decode(buf)?,
            s: Id160::decode(buf)?,
        })
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(r={:?}, s={:?})", self.r, self.s)
    }
}

/// An opaque encoded public key (DER bytes as produced by the host's crypto
/// provider). The overlay never parses it; it only hashes and compares it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Largest accepted encoded key; keys beyond this are malformed input.
    pub const MAX_ENCODED_LEN: usize = u16::MAX as usize;

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The key's 160-bit identity: `SHA-1(encoded key)`.
    ///
    /// Equality against a domain or content key is how a writer proves
    /// master-key ownership of that coordinate.
    pub fn key_hash(&self) -> Id160 {
        hash_bytes(&self.0)
    }

    /// Wire form: 2-byte big-endian length, then the raw bytes.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.0.len() as u16);
        buf.put_slice(&self.0);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        if buf.remaining() < 2 {
            return Err(DecodeError::UnexpectedEnd("public key length"));
        }
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(DecodeError::UnexpectedEnd("public key bytes"));
        }
        let mut bytes = vec![0u8; len];
        buf.copy_to_slice(&mut bytes);
        Ok(Self(bytes))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({:?}, {} bytes)", self.key_hash(), self.0.len())
    }
}

/// Host-provided signing and verification.
///
/// Implementations must be cheap to clone behind `Arc` and callable from any
/// worker. Long signing operations should run on a blocking executor; the
/// trait itself is synchronous because every production scheme the overlay
/// targets signs in microseconds at these payload sizes.
pub trait SignatureFactory: Send + Sync {
    /// Sign `data` with the factory's own private key.
    fn sign(&self, data: &[u8]) -> Result<Signature, CryptoError>;

    /// Verify `signature` over `data` against `public_key`.
    fn verify(
        &self,
        data: &[u8],
        signature: &Signature,
        public_key: &PublicKey,
    ) -> Result<bool, CryptoError>;

    /// The factory's own public key, if it has one.
    ///
    /// A factory configured with only a private key signs but advertises no
    /// key; the wire then omits the key and verifiers must be handed it out
    /// of band.
    fn own_public_key(&self) -> Option<PublicKey>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let sig = Signature::new(Id160::from_low_u8(1), Id160::from_low_u8(2));
        let mut buf = bytes::BytesMut::new();
        sig.encode(&mut buf);
        assert_eq!(buf.len(), Signature::ENCODED_LEN);

        let decoded = Signature::decode(&mut buf).expect("40 bytes available");
        assert_eq!(decoded, sig);
    }

    #[test]
    fn test_public_key_round_trip() {
        let key = PublicKey::from_bytes(vec![0x30, 0x16, 0x04, 0x14, 0xaa, 0xbb]);
        let mut buf = bytes::BytesMut::new();
        key.encode(&mut buf);

        let decoded = PublicKey::decode(&mut buf).expect("well-formed key");
        assert_eq!(decoded, key);
        assert_eq!(decoded.key_hash(), key.key_hash());
    }

    #[test]
    fn test_key_hash_distinguishes_keys() {
        let a = PublicKey::from_bytes(vec![1, 2, 3]);
        let b = PublicKey::from_bytes(vec![1, 2, 4]);
        assert_ne!(a.key_hash(), b.key_hash());
    }
}
