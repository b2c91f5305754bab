//! Codec errors.

use shared_types::DecodeError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown data type code {0}")]
    BadTypeCode(u8),

    #[error("declared payload length {0} exceeds the format maximum")]
    PayloadTooLarge(usize),

    #[error("buffer ended before {0}")]
    UnexpectedEnd(&'static str),

    #[error("payload incomplete: {missing} bytes missing")]
    PayloadIncomplete { missing: usize },

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
