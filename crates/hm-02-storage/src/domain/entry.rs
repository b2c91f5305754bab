//! Stored data entries.
//!
//! An entry is an opaque payload plus the metadata the wire and the
//! protection model need: optional TTL, optional version ancestry, optional
//! signature with the originator's public key, the per-entry protection bit
//! and two application-defined flags. `valid_from` is the local arrival time
//! and never travels; the payload hash is computed lazily for digests.

use std::sync::OnceLock;

use shared_crypto::{hash_bytes, CryptoError, PublicKey, Signature, SignatureFactory};
use shared_types::{Id160, Timestamp};

/// Size class of a payload, inferred from its length.
///
/// The class decides how many bytes the wire spends on the length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// ≤ 255 bytes, 1-byte length.
    Small,
    /// ≤ 65 535 bytes, 2-byte length.
    Medium,
    /// ≤ 2^31 − 1 bytes, 4-byte length.
    Large,
}

impl DataType {
    pub fn for_len(len: usize) -> Self {
        if len <= u8::MAX as usize {
            DataType::Small
        } else if len <= u16::MAX as usize {
            DataType::Medium
        } else {
            DataType::Large
        }
    }

    /// Number of bytes the wire uses for the payload length.
    pub fn length_bytes(&self) -> usize {
        match self {
            DataType::Small => 1,
            DataType::Medium => 2,
            DataType::Large => 4,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            DataType::Small => 0,
            DataType::Medium => 1,
            DataType::Large => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DataType::Small),
            1 => Some(DataType::Medium),
            2 => Some(DataType::Large),
            _ => None,
        }
    }
}

/// One stored value with its wire metadata.
#[derive(Debug)]
pub struct DataEntry {
    payload: Vec<u8>,
    pub ttl_seconds: Option<i32>,
    pub based_on: Option<Id160>,
    pub public_key: Option<PublicKey>,
    pub signature: Option<Signature>,
    pub protected_entry: bool,
    pub flag1: bool,
    pub flag2: bool,
    /// Local arrival wall-clock time; not serialized.
    pub valid_from: Timestamp,
    hash: OnceLock<Id160>,
}

impl DataEntry {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            ttl_seconds: None,
            based_on: None,
            public_key: None,
            signature: None,
            protected_entry: false,
            flag1: false,
            flag2: false,
            valid_from: Timestamp::from_millis(0),
            hash: OnceLock::new(),
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: i32) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    pub fn with_based_on(mut self, based_on: Id160) -> Self {
        self.based_on = Some(based_on);
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected_entry = true;
        self
    }

    pub fn with_flags(mut self, flag1: bool, flag2: bool) -> Self {
        self.flag1 = flag1;
        self.flag2 = flag2;
        self
    }

    /// Sign the payload; attaches the signature and, when the factory
    /// advertises one, the public key.
    pub fn sign(mut self, factory: &dyn SignatureFactory) -> Result<Self, CryptoError> {
        self.signature = Some(factory.sign(&self.payload)?);
        self.public_key = factory.own_public_key();
        Ok(self)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn data_type(&self) -> DataType {
        DataType::for_len(self.payload.len())
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Absolute expiry time, or `None` for immortal entries.
    ///
    /// A TTL of zero or below means "no expiry".
    pub fn expires_at(&self) -> Option<Timestamp> {
        match self.ttl_seconds {
            Some(ttl) if ttl > 0 => Some(self.valid_from.add_millis(ttl as u64 * 1000)),
            _ => None,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        match self.expires_at() {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// SHA-1 of the payload; computed once, then cached.
    pub fn content_hash(&self) -> Id160 {
        *self.hash.get_or_init(|| hash_bytes(&self.payload))
    }

    /// Verify the attached signature against `public_key`.
    pub fn verify(
        &self,
        factory: &dyn SignatureFactory,
        public_key: &PublicKey,
    ) -> Result<bool, CryptoError> {
        match &self.signature {
            Some(signature) => factory.verify(&self.payload, signature, public_key),
            None => Ok(false),
        }
    }
}

impl Clone for DataEntry {
    fn clone(&self) -> Self {
        let hash = OnceLock::new();
        if let Some(computed) = self.hash.get() {
            let _ = hash.set(*computed);
        }
        Self {
            payload: self.payload.clone(),
            ttl_seconds: self.ttl_seconds,
            based_on: self.based_on,
            public_key: self.public_key.clone(),
            signature: self.signature,
            protected_entry: self.protected_entry,
            flag1: self.flag1,
            flag2: self.flag2,
            valid_from: self.valid_from,
            hash,
        }
    }
}

// `valid_from` and the hash cache are local bookkeeping; equality covers the
// serialized identity of an entry.
impl PartialEq for DataEntry {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
            && self.ttl_seconds == other.ttl_seconds
            && self.based_on == other.based_on
            && self.public_key == other.public_key
            && self.signature == other.signature
            && self.protected_entry == other.protected_entry
            && self.flag1 == other.flag1
            && self.flag2 == other.flag2
    }
}

impl Eq for DataEntry {}
