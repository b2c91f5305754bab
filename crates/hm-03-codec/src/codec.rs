//! Wire format for stored data entries.
//!
//! Layout, in order:
//!
//! ```text
//! header(1) | length(1|2|4) | [ttl(4)] | [based_on(20)] | [pubkey(2+n)]
//!          | payload(length) | [signature r(20) s(20)]
//! ```
//!
//! The header byte carries, MSB → LSB: `based_on | signed | ttl |
//! protected_entry | flag2 | flag1 | type(2)`. The length field width is
//! chosen by the type class. The format is self-delimiting, so entries can
//! be parsed out of a stream without outer framing.
//!
//! Decoding is usable in streaming mode: [`decode_header`] peeks and
//! consumes nothing until the whole fixed prefix is available, then yields a
//! [`PartialData`] that swallows payload chunks as they arrive and is
//! finalized — signature read and verified — by [`PartialData::decode_done`].

use bytes::{Buf, BufMut, BytesMut};
use hm_02_storage::{DataEntry, DataType};
use shared_crypto::{PublicKey, Signature, SignatureFactory};
use shared_types::Id160;

use crate::errors::CodecError;

const FLAG_BASED_ON: u8 = 0b1000_0000;
const FLAG_SIGNED: u8 = 0b0100_0000;
const FLAG_TTL: u8 = 0b0010_0000;
const FLAG_PROTECTED: u8 = 0b0001_0000;
const FLAG2: u8 = 0b0000_1000;
const FLAG1: u8 = 0b0000_0100;
const TYPE_MASK: u8 = 0b0000_0011;

/// Largest payload the format can carry.
pub const MAX_PAYLOAD_LEN: usize = i32::MAX as usize;

/// Serialize an entry. `valid_from` and the cached hash do not travel.
pub fn encode(entry: &DataEntry, buf: &mut BytesMut) {
    let data_type = entry.data_type();
    let mut header = data_type.code();
    if entry.flag1 {
        header |= FLAG1;
    }
    if entry.flag2 {
        header |= FLAG2;
    }
    if entry.protected_entry {
        header |= FLAG_PROTECTED;
    }
    if entry.ttl_seconds.is_some() {
        header |= FLAG_TTL;
    }
    if entry.is_signed() {
        header |= FLAG_SIGNED;
    }
    if entry.based_on.is_some() {
        header |= FLAG_BASED_ON;
    }
    buf.put_u8(header);

    match data_type {
        DataType::Small => buf.put_u8(entry.len() as u8),
        DataType::Medium => buf.put_u16(entry.len() as u16),
        DataType::Large => buf.put_u32(entry.len() as u32),
    }

    if let Some(ttl) = entry.ttl_seconds {
        buf.put_i32(ttl);
    }
    if let Some(based_on) = &entry.based_on {
        based_on.encode(buf);
    }
    if entry.is_signed() {
        // A signer configured with only a private key leaves the key off the
        // wire; the receiver must be handed it externally.
        match &entry.public_key {
            Some(key) => key.encode(buf),
            None => buf.put_u16(0),
        }
    }

    buf.put_slice(entry.payload());

    if let Some(signature) = &entry.signature {
        signature.encode(buf);
    }
}

/// An entry whose prefix has been decoded but whose payload (and trailing
/// signature) is still in flight.
#[derive(Debug)]
pub struct PartialData {
    ttl_seconds: Option<i32>,
    based_on: Option<Id160>,
    public_key: Option<PublicKey>,
    signed: bool,
    protected_entry: bool,
    flag1: bool,
    flag2: bool,
    expected_len: usize,
    payload: Vec<u8>,
}

impl PartialData {
    /// Bytes of payload still missing.
    pub fn remaining(&self) -> usize {
        self.expected_len - self.payload.len()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Consume up to the missing payload length from `buf`. Returns true
    /// once the payload is complete.
    pub fn decode_buffer(&mut self, buf: &mut BytesMut) -> bool {
        let take = self.remaining().min(buf.len());
        self.payload.extend_from_slice(&buf[..take]);
        buf.advance(take);
        self.is_complete()
    }

    /// Read the trailing signature (when the entry is signed) and build the
    /// finished entry, verifying the signature when a key is at hand.
    ///
    /// `external_key` supplies the verification key for entries whose signer
    /// did not put its key on the wire. When the entry is signed and neither
    /// an on-wire nor an external key exists, the signature is attached
    /// unverified and the caller decides whether to trust it.
    pub fn decode_done(
        mut self,
        buf: &mut BytesMut,
        factory: &dyn SignatureFactory,
        external_key: Option<&PublicKey>,
    ) -> Result<DataEntry, CodecError> {
        if !self.is_complete() {
            return Err(CodecError::PayloadIncomplete {
                missing: self.remaining(),
            });
        }
        let signature = if self.signed {
            if buf.len() < Signature::ENCODED_LEN {
                return Err(CodecError::UnexpectedEnd("signature"));
            }
            Some(Signature::decode(buf)?)
        } else {
            None
        };

        if let Some(signature) = &signature {
            let key = self.public_key.as_ref().or(external_key);
            if let Some(key) = key {
                let valid = factory
                    .verify(&self.payload, signature, key)
                    .map_err(|_| CodecError::SignatureInvalid)?;
                if !valid {
                    return Err(CodecError::SignatureInvalid);
                }
            }
        }

        let mut entry = DataEntry::new(std::mem::take(&mut self.payload));
        entry.ttl_seconds = self.ttl_seconds;
        entry.based_on = self.based_on;
        entry.public_key = self.public_key;
        entry.signature = signature;
        entry.protected_entry = self.protected_entry;
        entry.flag1 = self.flag1;
        entry.flag2 = self.flag2;
        Ok(entry)
    }
}

/// Try to decode the fixed prefix of an entry.
///
/// Returns `Ok(None)` — consuming nothing — while the buffer holds fewer
/// bytes than the prefix needs. On success the prefix is consumed and the
/// payload/signature remain for [`PartialData::decode_buffer`] /
/// [`PartialData::decode_done`].
pub fn decode_header(buf: &mut BytesMut) -> Result<Option<PartialData>, CodecError> {
    let mut peek: &[u8] = &buf[..];
    if peek.remaining() < 1 {
        return Ok(None);
    }
    let header = peek.get_u8();
    let data_type =
        DataType::from_code(header & TYPE_MASK).ok_or(CodecError::BadTypeCode(header & TYPE_MASK))?;

    if peek.remaining() < data_type.length_bytes() {
        return Ok(None);
    }
    let expected_len = match data_type {
        DataType::Small => peek.get_u8() as usize,
        DataType::Medium => peek.get_u16() as usize,
        DataType::Large => peek.get_u32() as usize,
    };
    if expected_len > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge(expected_len));
    }

    let ttl_seconds = if header & FLAG_TTL != 0 {
        if peek.remaining() < 4 {
            return Ok(None);
        }
        Some(peek.get_i32())
    } else {
        None
    };

    let based_on = if header & FLAG_BASED_ON != 0 {
        if peek.remaining() < 20 {
            return Ok(None);
        }
        Some(Id160::decode(&mut peek).expect("length checked"))
    } else {
        None
    };

    let signed = header & FLAG_SIGNED != 0;
    let public_key = if signed {
        if peek.remaining() < 2 {
            return Ok(None);
        }
        let key_len = u16::from_be_bytes([peek[0], peek[1]]) as usize;
        if peek.remaining() < 2 + key_len {
            return Ok(None);
        }
        peek.advance(2);
        if key_len == 0 {
            None
        } else {
            let mut key_bytes = vec![0u8; key_len];
            peek.copy_to_slice(&mut key_bytes);
            Some(PublicKey::from_bytes(key_bytes))
        }
    } else {
        None
    };

    let consumed = buf.len() - peek.remaining();
    buf.advance(consumed);

    Ok(Some(PartialData {
        ttl_seconds,
        based_on,
        public_key,
        signed,
        protected_entry: header & FLAG_PROTECTED != 0,
        flag1: header & FLAG1 != 0,
        flag2: header & FLAG2 != 0,
        expected_len,
        payload: Vec::with_capacity(expected_len.min(1 << 20)),
    }))
}

/// Decode one whole entry from `buf` without signature verification.
///
/// Returns `Ok(None)` if the buffer does not yet hold a complete entry; in
/// that case nothing is consumed.
pub fn decode(buf: &mut BytesMut) -> Result<Option<DataEntry>, CodecError> {
    let mut probe = buf.clone();
    let Some(mut partial) = decode_header(&mut probe)? else {
        return Ok(None);
    };
    if !partial.decode_buffer(&mut probe) {
        return Ok(None);
    }
    let signature = if partial.signed {
        if probe.len() < Signature::ENCODED_LEN {
            return Ok(None);
        }
        Some(Signature::decode(&mut probe)?)
    } else {
        None
    };

    let consumed = buf.len() - probe.len();
    buf.advance(consumed);

    let mut entry = DataEntry::new(std::mem::take(&mut partial.payload));
    entry.ttl_seconds = partial.ttl_seconds;
    entry.based_on = partial.based_on;
    entry.public_key = partial.public_key;
    entry.signature = signature;
    entry.protected_entry = partial.protected_entry;
    entry.flag1 = partial.flag1;
    entry.flag2 = partial.flag2;
    Ok(Some(entry))
}
