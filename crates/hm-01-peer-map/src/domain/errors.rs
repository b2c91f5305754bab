//! Peer map errors.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PeerMapError {
    #[error("cannot insert the local peer into its own map")]
    SelfInsertion,

    #[error("the zero id is reserved and cannot be mapped")]
    ReservedId,
}
