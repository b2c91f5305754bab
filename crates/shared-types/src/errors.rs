//! Shared wire-decoding errors.

use thiserror::Error;

/// Failure while decoding a shared wire structure.
///
/// Higher layers fold these into their own protocol-violation handling; a
/// decode failure on a connection drops the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer ended before {0}")]
    UnexpectedEnd(&'static str),

    #[error("unknown address type {0}")]
    UnknownAddressType(u8),

    #[error("relay list exceeds maximum of {max}")]
    TooManyRelays { max: usize },

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: u64 },
}
