//! # RPC Layer
//!
//! The typed request/response families of the overlay, the binary message
//! envelope, completion promises with listener chains and cancellation,
//! channel permit pools, and the dispatcher with its per-destination
//! forwarder strategy (the relay hook).

pub mod adapters;
pub mod dispatcher;
pub mod errors;
pub mod future;
pub mod message;
pub mod ports;
pub mod reservation;
pub mod sender;
pub mod wire_codec;

pub use dispatcher::{Dispatcher, Forwarder, RpcHandler};
pub use errors::FailReason;
pub use future::{late_join, Promise};
pub use message::{
    Command, Message, MessageBody, MessageType, StoreRequest, StoreResponse, PROTOCOL_MAGIC,
};
pub use ports::{PeerChannel, Wire};
pub use reservation::{ChannelKind, ChannelReservation, ConnectionConfig};
pub use sender::RequestSender;
pub use wire_codec::{
    decode_framed, decode_from_slice, decode_message, encode_framed, encode_message,
    encode_to_vec, MessageCodecError,
};
