//! Crypto capability errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("no private key available for signing")]
    NoPrivateKey,

    #[error("public key is malformed")]
    InvalidPublicKey,

    #[error("signature verification failed")]
    VerificationFailed,
}
