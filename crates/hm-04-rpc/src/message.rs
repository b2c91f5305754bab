//! Typed RPC messages.
//!
//! Every message carries the fixed envelope — protocol magic, command, kind,
//! 4-byte message id, full sender address, 20-byte recipient id — followed
//! by a command-specific body. Responses echo the request's message id.

use std::collections::BTreeMap;

use hm_02_storage::{DataEntry, DigestInfo, StorageResult};
use rand::Rng;
use shared_crypto::PublicKey;
use shared_types::{Id160, Key320, Key640, PeerAddress, SimpleBloomFilter};

/// Protocol magic: "HM".
pub const PROTOCOL_MAGIC: u16 = 0x484d;

/// RPC command families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Ping,
    Store,
    Neighbors,
    Direct,
    Quit,
    PeerExchange,
    Broadcast,
    Relay,
}

impl Command {
    pub fn code(&self) -> u8 {
        match self {
            Command::Ping => 1,
            Command::Store => 2,
            Command::Neighbors => 3,
            Command::Direct => 4,
            Command::Quit => 5,
            Command::PeerExchange => 6,
            Command::Broadcast => 7,
            Command::Relay => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Command::Ping),
            2 => Some(Command::Store),
            3 => Some(Command::Neighbors),
            4 => Some(Command::Direct),
            5 => Some(Command::Quit),
            6 => Some(Command::PeerExchange),
            7 => Some(Command::Broadcast),
            8 => Some(Command::Relay),
            _ => None,
        }
    }
}

/// Kind of a message within its command family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Ack,
    Ok,
    Partial,
    Fail,
}

impl MessageType {
    pub fn code(&self) -> u8 {
        match self {
            MessageType::Request => 1,
            MessageType::Ack => 2,
            MessageType::Ok => 3,
            MessageType::Partial => 4,
            MessageType::Fail => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MessageType::Request),
            2 => Some(MessageType::Ack),
            3 => Some(MessageType::Ok),
            4 => Some(MessageType::Partial),
            5 => Some(MessageType::Fail),
            _ => None,
        }
    }
}

/// Storage sub-commands, the request side of the STORE family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRequest {
    Put {
        key: Key640,
        entry: DataEntry,
        public_key: Option<PublicKey>,
        put_if_absent: bool,
        claim_domain: bool,
    },
    Get {
        key: Key640,
    },
    GetRange {
        from: Key640,
        to: Key640,
        key_bloom: Option<SimpleBloomFilter>,
        content_bloom: Option<SimpleBloomFilter>,
    },
    Remove {
        key: Key640,
        public_key: Option<PublicKey>,
    },
    RemoveRange {
        from: Key640,
        to: Key640,
        public_key: Option<PublicKey>,
    },
    DigestRange {
        from: Key640,
        to: Key640,
    },
    DigestBloom {
        branch: Key320,
        key_bloom: Option<SimpleBloomFilter>,
        content_bloom: Option<SimpleBloomFilter>,
    },
    DigestKeys {
        keys: Vec<Key640>,
    },
}

/// The response side of the STORE family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreResponse {
    Status(StorageResult),
    Entries(BTreeMap<Key640, DataEntry>),
    Digest(DigestInfo),
}

/// Command-specific payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Empty,
    Store(StoreRequest),
    StoreOutcome(StoreResponse),
    NeighborsQuery {
        target: Id160,
    },
    Neighbors {
        peers: Vec<PeerAddress>,
        /// Digest of the responder's entries at the queried location, when
        /// the routing operation asked for one.
        digest: Option<DigestInfo>,
    },
    Direct {
        payload: Vec<u8>,
    },
    PeerExchange {
        peers: Vec<PeerAddress>,
    },
    Broadcast {
        broadcast_id: Id160,
        hop: u8,
        payload: Vec<u8>,
    },
    RelaySetup,
    /// A whole encoded message to be handed to the relayed peer.
    RelayForward {
        inner: Vec<u8>,
    },
    /// The relayed peer's encoded response on the way back.
    RelayReply {
        inner: Vec<u8>,
    },
}

/// One RPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub message_type: MessageType,
    pub message_id: u32,
    pub sender: PeerAddress,
    pub recipient: Id160,
    pub body: MessageBody,
}

impl Message {
    /// Build a request with a fresh random message id.
    pub fn request(
        command: Command,
        sender: PeerAddress,
        recipient: Id160,
        body: MessageBody,
    ) -> Self {
        Self {
            command,
            message_type: MessageType::Request,
            message_id: rand::thread_rng().gen(),
            sender,
            recipient,
            body,
        }
    }

    /// Build a response to `self`, echoing the message id.
    pub fn response(&self, message_type: MessageType, sender: PeerAddress, body: MessageBody) -> Self {
        Self {
            command: self.command,
            message_type,
            message_id: self.message_id,
            sender,
            recipient: self.sender.peer_id,
            body,
        }
    }

    pub fn ok_response(&self, sender: PeerAddress, body: MessageBody) -> Self {
        self.response(MessageType::Ok, sender, body)
    }

    pub fn fail_response(&self, sender: PeerAddress) -> Self {
        self.response(MessageType::Fail, sender, MessageBody::Empty)
    }

    pub fn is_request(&self) -> bool {
        self.message_type == MessageType::Request
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.message_type, MessageType::Ok | MessageType::Partial)
    }
}
