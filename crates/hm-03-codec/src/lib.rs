//! # Data Codec
//!
//! The compact, header-flagged, self-delimiting binary format for stored
//! data entries, including the streaming decode path used when a large
//! payload arrives fragmented.

pub mod codec;
pub mod errors;

pub use codec::{decode, decode_header, encode, PartialData, MAX_PAYLOAD_LEN};
pub use errors::CodecError;
