//! Envelope and body encoding for RPC messages.
//!
//! Envelope layout: `magic(2) | command(1) | type(1) | message_id(4) |
//! sender address(var) | recipient id(20) | body(var)`. The body layout is
//! decided by the `(command, type)` pair; stored entries inside STORE bodies
//! reuse the data codec. TCP connections multiplex messages with a 4-byte
//! length frame; UDP sends one unframed message per datagram.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};
use hm_02_storage::{DataEntry, DigestInfo, StorageResult};
use shared_crypto::PublicKey;
use shared_types::{DecodeError, Id160, Key320, Key640, PeerAddress, SimpleBloomFilter};
use thiserror::Error;

use crate::message::{
    Command, Message, MessageBody, MessageType, StoreRequest, StoreResponse, PROTOCOL_MAGIC,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageCodecError {
    #[error("bad protocol magic {0:#06x}")]
    BadMagic(u16),

    #[error("unknown command {0}")]
    UnknownCommand(u8),

    #[error("unknown message type {0}")]
    UnknownType(u8),

    #[error("unknown sub-command {0}")]
    UnknownSubCommand(u8),

    #[error("unknown storage result {0}")]
    UnknownStorageResult(u8),

    #[error("buffer ended before {0}")]
    UnexpectedEnd(&'static str),

    #[error("truncated data entry")]
    TruncatedEntry,

    #[error(transparent)]
    Shared(#[from] DecodeError),

    #[error(transparent)]
    Data(#[from] hm_03_codec::CodecError),
}

// =============================================================================
// Small field helpers
// =============================================================================

fn put_blob(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn get_blob(buf: &mut BytesMut) -> Result<Vec<u8>, MessageCodecError> {
    if buf.remaining() < 4 {
        return Err(MessageCodecError::UnexpectedEnd("blob length"));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(MessageCodecError::UnexpectedEnd("blob bytes"));
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

fn put_opt_bloom(buf: &mut BytesMut, bloom: &Option<SimpleBloomFilter>) {
    match bloom {
        Some(filter) => {
            buf.put_u8(1);
            filter.encode(buf);
        }
        None => buf.put_u8(0),
    }
}

fn get_opt_bloom(buf: &mut BytesMut) -> Result<Option<SimpleBloomFilter>, MessageCodecError> {
    if buf.remaining() < 1 {
        return Err(MessageCodecError::UnexpectedEnd("bloom presence"));
    }
    if buf.get_u8() == 0 {
        return Ok(None);
    }
    Ok(Some(SimpleBloomFilter::decode(buf)?))
}

fn put_opt_public_key(buf: &mut BytesMut, key: &Option<PublicKey>) {
    match key {
        Some(key) => {
            buf.put_u8(1);
            key.encode(buf);
        }
        None => buf.put_u8(0),
    }
}

fn get_opt_public_key(buf: &mut BytesMut) -> Result<Option<PublicKey>, MessageCodecError> {
    if buf.remaining() < 1 {
        return Err(MessageCodecError::UnexpectedEnd("key presence"));
    }
    if buf.get_u8() == 0 {
        return Ok(None);
    }
    Ok(Some(PublicKey::decode(buf)?))
}

fn put_peers(buf: &mut BytesMut, peers: &[PeerAddress]) {
    buf.put_u16(peers.len() as u16);
    for peer in peers {
        peer.encode(buf);
    }
}

fn get_peers(buf: &mut BytesMut) -> Result<Vec<PeerAddress>, MessageCodecError> {
    if buf.remaining() < 2 {
        return Err(MessageCodecError::UnexpectedEnd("peer count"));
    }
    let count = buf.get_u16() as usize;
    let mut peers = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        peers.push(PeerAddress::decode(buf)?);
    }
    Ok(peers)
}

fn put_entry(buf: &mut BytesMut, entry: &DataEntry) {
    hm_03_codec::encode(entry, buf);
}

fn get_entry(buf: &mut BytesMut) -> Result<DataEntry, MessageCodecError> {
    hm_03_codec::decode(buf)?.ok_or(MessageCodecError::TruncatedEntry)
}

fn put_entry_map(buf: &mut BytesMut, entries: &BTreeMap<Key640, DataEntry>) {
    buf.put_u32(entries.len() as u32);
    for (key, entry) in entries {
        key.encode(buf);
        put_entry(buf, entry);
    }
}

fn get_entry_map(buf: &mut BytesMut) -> Result<BTreeMap<Key640, DataEntry>, MessageCodecError> {
    if buf.remaining() < 4 {
        return Err(MessageCodecError::UnexpectedEnd("entry count"));
    }
    let count = buf.get_u32() as usize;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let key = Key640::decode(buf)?;
        entries.insert(key, get_entry(buf)?);
    }
    Ok(entries)
}

fn put_digest(buf: &mut BytesMut, digest: &DigestInfo) {
    buf.put_u32(digest.entries.len() as u32);
    for (key, hash) in &digest.entries {
        key.encode(buf);
        hash.encode(buf);
    }
}

fn get_digest(buf: &mut BytesMut) -> Result<DigestInfo, MessageCodecError> {
    if buf.remaining() < 4 {
        return Err(MessageCodecError::UnexpectedEnd("digest count"));
    }
    let count = buf.get_u32() as usize;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let key = Key640::decode(buf)?;
        entries.insert(key, Id160::decode(buf)?);
    }
    Ok(DigestInfo { entries })
}

// =============================================================================
// Body encoding
// =============================================================================

fn encode_store_request(buf: &mut BytesMut, request: &StoreRequest) {
    match request {
        StoreRequest::Put {
            key,
            entry,
            public_key,
            put_if_absent,
            claim_domain,
        } => {
            buf.put_u8(0);
            key.encode(buf);
            put_opt_public_key(buf, public_key);
            let mut flags = 0u8;
            if *put_if_absent {
                flags |= 0x01;
            }
            if *claim_domain {
                flags |= 0x02;
            }
            buf.put_u8(flags);
            put_entry(buf, entry);
        }
        StoreRequest::Get { key } => {
            buf.put_u8(1);
            key.encode(buf);
        }
        StoreRequest::GetRange {
            from,
            to,
            key_bloom,
            content_bloom,
        } => {
            buf.put_u8(2);
            from.encode(buf);
            to.encode(buf);
            put_opt_bloom(buf, key_bloom);
            put_opt_bloom(buf, content_bloom);
        }
        StoreRequest::Remove { key, public_key } => {
            buf.put_u8(3);
            key.encode(buf);
            put_opt_public_key(buf, public_key);
        }
        StoreRequest::RemoveRange {
            from,
            to,
            public_key,
        } => {
            buf.put_u8(4);
            from.encode(buf);
            to.encode(buf);
            put_opt_public_key(buf, public_key);
        }
        StoreRequest::DigestRange { from, to } => {
            buf.put_u8(5);
            from.encode(buf);
            to.encode(buf);
        }
        StoreRequest::DigestBloom {
            branch,
            key_bloom,
            content_bloom,
        } => {
            buf.put_u8(6);
            branch.encode(buf);
            put_opt_bloom(buf, key_bloom);
            put_opt_bloom(buf, content_bloom);
        }
        StoreRequest::DigestKeys { keys } => {
            buf.put_u8(7);
            buf.put_u32(keys.len() as u32);
            for key in keys {
                key.encode(buf);
            }
        }
    }
}

fn decode_store_request(buf: &mut BytesMut) -> Result<StoreRequest, MessageCodecError> {
    if buf.remaining() < 1 {
        return Err(MessageCodecError::UnexpectedEnd("store sub-command"));
    }
    match buf.get_u8() {
        0 => {
            let key = Key640::decode(buf)?;
            let public_key = get_opt_public_key(buf)?;
            if buf.remaining() < 1 {
                return Err(MessageCodecError::UnexpectedEnd("put flags"));
            }
            let flags = buf.get_u8();
            let entry = get_entry(buf)?;
            Ok(StoreRequest::Put {
                key,
                entry,
                public_key,
                put_if_absent: flags & 0x01 != 0,
                claim_domain: flags & 0x02 != 0,
            })
        }
        1 => Ok(StoreRequest::Get {
            key: Key640::decode(buf)?,
        }),
        2 => Ok(StoreRequest::GetRange {
            from: Key640::decode(buf)?,
            to: Key640::decode(buf)?,
            key_bloom: get_opt_bloom(buf)?,
            content_bloom: get_opt_bloom(buf)?,
        }),
        3 => Ok(StoreRequest::Remove {
            key: Key640::decode(buf)?,
            public_key: get_opt_public_key(buf)?,
        }),
        4 => Ok(StoreRequest::RemoveRange {
            from: Key640::decode(buf)?,
            to: Key640::decode(buf)?,
            public_key: get_opt_public_key(buf)?,
        }),
        5 => Ok(StoreRequest::DigestRange {
            from: Key640::decode(buf)?,
            to: Key640::decode(buf)?,
        }),
        6 => Ok(StoreRequest::DigestBloom {
            branch: Key320::decode(buf)?,
            key_bloom: get_opt_bloom(buf)?,
            content_bloom: get_opt_bloom(buf)?,
        }),
        7 => {
            if buf.remaining() < 4 {
                return Err(MessageCodecError::UnexpectedEnd("key count"));
            }
            let count = buf.get_u32() as usize;
            let mut keys = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                keys.push(Key640::decode(buf)?);
            }
            Ok(StoreRequest::DigestKeys { keys })
        }
        other => Err(MessageCodecError::UnknownSubCommand(other)),
    }
}

fn encode_store_response(buf: &mut BytesMut, response: &StoreResponse) {
    match response {
        StoreResponse::Status(status) => {
            buf.put_u8(0);
            buf.put_u8(status.code());
        }
        StoreResponse::Entries(entries) => {
            buf.put_u8(1);
            put_entry_map(buf, entries);
        }
        StoreResponse::Digest(digest) => {
            buf.put_u8(2);
            put_digest(buf, digest);
        }
    }
}

fn decode_store_response(buf: &mut BytesMut) -> Result<StoreResponse, MessageCodecError> {
    if buf.remaining() < 2 {
        return Err(MessageCodecError::UnexpectedEnd("store response"));
    }
    match buf.get_u8() {
        0 => {
            let code = buf.get_u8();
            StorageResult::from_code(code)
                .map(StoreResponse::Status)
                .ok_or(MessageCodecError::UnknownStorageResult(code))
        }
        1 => Ok(StoreResponse::Entries(get_entry_map(buf)?)),
        2 => Ok(StoreResponse::Digest(get_digest(buf)?)),
        other => Err(MessageCodecError::UnknownSubCommand(other)),
    }
}

fn encode_body(buf: &mut BytesMut, body: &MessageBody) {
    match body {
        MessageBody::Empty => {}
        MessageBody::Store(request) => encode_store_request(buf, request),
        MessageBody::StoreOutcome(response) => encode_store_response(buf, response),
        MessageBody::NeighborsQuery { target } => target.encode(buf),
        MessageBody::Neighbors { peers, digest } => {
            put_peers(buf, peers);
            match digest {
                Some(digest) => {
                    buf.put_u8(1);
                    put_digest(buf, digest);
                }
                None => buf.put_u8(0),
            }
        }
        MessageBody::Direct { payload } => put_blob(buf, payload),
        MessageBody::PeerExchange { peers } => put_peers(buf, peers),
        MessageBody::Broadcast {
            broadcast_id,
            hop,
            payload,
        } => {
            broadcast_id.encode(buf);
            buf.put_u8(*hop);
            put_blob(buf, payload);
        }
        MessageBody::RelaySetup => buf.put_u8(0),
        MessageBody::RelayForward { inner } => {
            buf.put_u8(1);
            put_blob(buf, inner);
        }
        MessageBody::RelayReply { inner } => {
            buf.put_u8(1);
            put_blob(buf, inner);
        }
    }
}

fn decode_body(
    command: Command,
    message_type: MessageType,
    buf: &mut BytesMut,
) -> Result<MessageBody, MessageCodecError> {
    match (command, message_type) {
        (Command::Store, MessageType::Request) => {
            Ok(MessageBody::Store(decode_store_request(buf)?))
        }
        (Command::Store, MessageType::Ok | MessageType::Partial) => {
            Ok(MessageBody::StoreOutcome(decode_store_response(buf)?))
        }
        (Command::Neighbors, MessageType::Request) => Ok(MessageBody::NeighborsQuery {
            target: Id160::decode(buf)?,
        }),
        (Command::Neighbors, MessageType::Ok) => {
            let peers = get_peers(buf)?;
            if buf.remaining() < 1 {
                return Err(MessageCodecError::UnexpectedEnd("digest presence"));
            }
            let digest = if buf.get_u8() == 1 {
                Some(get_digest(buf)?)
            } else {
                None
            };
            Ok(MessageBody::Neighbors { peers, digest })
        }
        (Command::Direct, MessageType::Request) => Ok(MessageBody::Direct {
            payload: get_blob(buf)?,
        }),
        (Command::PeerExchange, MessageType::Request) => Ok(MessageBody::PeerExchange {
            peers: get_peers(buf)?,
        }),
        (Command::Broadcast, MessageType::Request) => {
            let broadcast_id = Id160::decode(buf)?;
            if buf.remaining() < 1 {
                return Err(MessageCodecError::UnexpectedEnd("hop counter"));
            }
            let hop = buf.get_u8();
            Ok(MessageBody::Broadcast {
                broadcast_id,
                hop,
                payload: get_blob(buf)?,
            })
        }
        (Command::Relay, MessageType::Request) => {
            if buf.remaining() < 1 {
                return Err(MessageCodecError::UnexpectedEnd("relay sub-command"));
            }
            match buf.get_u8() {
                0 => Ok(MessageBody::RelaySetup),
                1 => Ok(MessageBody::RelayForward {
                    inner: get_blob(buf)?,
                }),
                other => Err(MessageCodecError::UnknownSubCommand(other)),
            }
        }
        (Command::Relay, MessageType::Ok) => {
            if buf.remaining() < 1 {
                return Err(MessageCodecError::UnexpectedEnd("relay reply tag"));
            }
            match buf.get_u8() {
                0 => Ok(MessageBody::Empty),
                1 => Ok(MessageBody::RelayReply {
                    inner: get_blob(buf)?,
                }),
                other => Err(MessageCodecError::UnknownSubCommand(other)),
            }
        }
        // Everything else carries no body: PING/QUIT both ways, ACKs, FAILs
        // and plain OK acknowledgments.
        _ => Ok(MessageBody::Empty),
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Serialize one message (unframed).
pub fn encode_message(message: &Message, buf: &mut BytesMut) {
    buf.put_u16(PROTOCOL_MAGIC);
    buf.put_u8(message.command.code());
    buf.put_u8(message.message_type.code());
    buf.put_u32(message.message_id);
    message.sender.encode(buf);
    message.recipient.encode(buf);
    // Relay OK acks need their tag even with an empty body.
    if message.command == Command::Relay
        && message.message_type == MessageType::Ok
        && message.body == MessageBody::Empty
    {
        buf.put_u8(0);
        return;
    }
    encode_body(buf, &message.body);
}

/// Parse one complete message (unframed). The whole message must be in the
/// buffer; shortage is a protocol violation at this layer.
pub fn decode_message(buf: &mut BytesMut) -> Result<Message, MessageCodecError> {
    if buf.remaining() < 8 {
        return Err(MessageCodecError::UnexpectedEnd("envelope"));
    }
    let magic = buf.get_u16();
    if magic != PROTOCOL_MAGIC {
        return Err(MessageCodecError::BadMagic(magic));
    }
    let command_code = buf.get_u8();
    let command =
        Command::from_code(command_code).ok_or(MessageCodecError::UnknownCommand(command_code))?;
    let type_code = buf.get_u8();
    let message_type =
        MessageType::from_code(type_code).ok_or(MessageCodecError::UnknownType(type_code))?;
    let message_id = buf.get_u32();
    let sender = PeerAddress::decode(buf)?;
    let recipient = Id160::decode(buf)?;
    let body = decode_body(command, message_type, buf)?;
    Ok(Message {
        command,
        message_type,
        message_id,
        sender,
        recipient,
        body,
    })
}

/// Serialize with the 4-byte length frame used on multiplexed TCP.
pub fn encode_framed(message: &Message, buf: &mut BytesMut) {
    let mut body = BytesMut::new();
    encode_message(message, &mut body);
    buf.put_u32(body.len() as u32);
    buf.unsplit(body);
}

/// Parse one length-framed message; `Ok(None)` (nothing consumed) while the
/// frame is incomplete.
pub fn decode_framed(buf: &mut BytesMut) -> Result<Option<Message>, MessageCodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + frame_len {
        return Ok(None);
    }
    buf.advance(4);
    let mut frame = buf.split_to(frame_len);
    decode_message(&mut frame).map(Some)
}

/// Serialize to a standalone byte vector (relay forwarding, datagrams).
pub fn encode_to_vec(message: &Message) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_message(message, &mut buf);
    buf.to_vec()
}

/// Parse from a standalone byte slice.
pub fn decode_from_slice(bytes: &[u8]) -> Result<Message, MessageCodecError> {
    let mut buf = BytesMut::from(bytes);
    decode_message(&mut buf)
}
