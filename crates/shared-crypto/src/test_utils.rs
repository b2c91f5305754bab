//! Deterministic keypairs and a test signature factory.
//!
//! The production signature scheme is host-provided; unit and scenario tests
//! use this HMAC-SHA1 construction instead. It is *recomputable from the
//! public key*, so it offers no authenticity whatsoever — it only exercises
//! the sign/verify/wire paths deterministically. Never wire it into a real
//! deployment.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;
use shared_types::{Id160, ID_BYTES};

use crate::errors::CryptoError;
use crate::hashing::hash_bytes;
use crate::signatures::{PublicKey, Signature, SignatureFactory};

type HmacSha1 = Hmac<Sha1>;

/// Leading bytes that make a generated key look like a DER octet string.
const DER_OCTET_PREFIX: [u8; 4] = [0x30, 0x16, 0x04, 0x14];

fn hmac_id(key: &[u8], data: &[u8]) -> Id160 {
    let mut mac = HmacSha1::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    Id160::new(mac.finalize().into_bytes().into())
}

/// A deterministic test keypair derived from a 20-byte seed.
#[derive(Debug, Clone)]
pub struct TestKeyPair {
    seed: [u8; ID_BYTES],
    public: PublicKey,
}

impl TestKeyPair {
    pub fn from_seed(seed: [u8; ID_BYTES]) -> Self {
        let fingerprint = hash_bytes(&seed);
        let mut encoded = Vec::with_capacity(DER_OCTET_PREFIX.len() + ID_BYTES);
        encoded.extend_from_slice(&DER_OCTET_PREFIX);
        encoded.extend_from_slice(fingerprint.as_bytes());
        Self {
            seed,
            public: PublicKey::from_bytes(encoded),
        }
    }

    pub fn from_low_u8(value: u8) -> Self {
        let mut seed = [0u8; ID_BYTES];
        seed[ID_BYTES - 1] = value;
        Self::from_seed(seed)
    }

    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut seed = [0u8; ID_BYTES];
        rng.fill(&mut seed[..]);
        Self::from_seed(seed)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn seed(&self) -> &[u8; ID_BYTES] {
        &self.seed
    }
}

/// Signature factory over a [`TestKeyPair`].
pub struct TestSignatureFactory {
    keypair: TestKeyPair,
    advertise_key: bool,
}

impl TestSignatureFactory {
    pub fn new(keypair: TestKeyPair) -> Self {
        Self {
            keypair,
            advertise_key: true,
        }
    }

    /// Factory that signs but does not advertise its public key, mirroring
    /// a host configured with only a private key.
    pub fn private_only(keypair: TestKeyPair) -> Self {
        Self {
            keypair,
            advertise_key: false,
        }
    }
}

impl SignatureFactory for TestSignatureFactory {
    fn sign(&self, data: &[u8]) -> Result<Signature, CryptoError> {
        let key = self.keypair.public.as_bytes();
        let r = hmac_id(key, data);
        let s = hmac_id(key, r.as_bytes());
        Ok(Signature::new(r, s))
    }

    fn verify(
        &self,
        data: &[u8],
        signature: &Signature,
        public_key: &PublicKey,
    ) -> Result<bool, CryptoError> {
        let key = public_key.as_bytes();
        let r = hmac_id(key, data);
        let s = hmac_id(key, r.as_bytes());
        Ok(signature.r == r && signature.s == s)
    }

    fn own_public_key(&self) -> Option<PublicKey> {
        self.advertise_key.then(|| self.keypair.public.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let factory = TestSignatureFactory::new(TestKeyPair::from_low_u8(1));
        let data = b"payload bytes";

        let sig = factory.sign(data).expect("signing succeeds");
        let key = factory.own_public_key().expect("key advertised");

        assert!(factory.verify(data, &sig, &key).expect("verify runs"));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let signer = TestSignatureFactory::new(TestKeyPair::from_low_u8(1));
        let other = TestKeyPair::from_low_u8(2);

        let sig = signer.sign(b"payload").expect("signing succeeds");
        let ok = signer
            .verify(b"payload", &sig, other.public_key())
            .expect("verify runs");

        assert!(!ok, "signature bound to a different key must fail");
    }

    #[test]
    fn test_verify_rejects_tampered_payload() {
        let factory = TestSignatureFactory::new(TestKeyPair::from_low_u8(1));
        let sig = factory.sign(b"payload").expect("signing succeeds");
        let key = factory.own_public_key().expect("key advertised");

        assert!(!factory.verify(b"payloaX", &sig, &key).expect("verify runs"));
    }

    #[test]
    fn test_private_only_factory_hides_key() {
        let factory = TestSignatureFactory::private_only(TestKeyPair::from_low_u8(3));
        assert!(factory.own_public_key().is_none());
    }

    #[test]
    fn test_keypair_is_seed_deterministic() {
        let a = TestKeyPair::from_low_u8(9);
        let b = TestKeyPair::from_low_u8(9);
        assert_eq!(a.public_key(), b.public_key());
    }
}
