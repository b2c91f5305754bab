//! Failure reasons carried by completion promises.
//!
//! Errors never escape the event loop as panics; every async operation ends
//! in either a value or one of these reasons on its promise.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailReason {
    /// No response within the RPC budget. The routing layer retries with
    /// the next candidate.
    #[error("request timed out")]
    Timeout,

    /// No channel permit available (pool closed or exhausted). Not retried.
    #[error("channel reservation failed")]
    ChannelReservationFailed,

    /// Channel open or send failed; the peer map downgrades the peer.
    #[error("peer unreachable")]
    PeerUnreachable,

    /// Malformed message, bad magic, length mismatch. Connection dropped.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Data signature did not verify; the entry is rejected.
    #[error("signature invalid")]
    SignatureInvalid,

    /// The local peer is shutting down.
    #[error("peer is shutting down")]
    Shutdown,

    /// The promise was cancelled by its holder.
    #[error("operation cancelled")]
    Cancelled,

    /// Broadcast requested without any usable recipient.
    #[error("no broadcast address available")]
    NoBroadcastAddress,

    /// Local misuse of an API.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// A join over several sub-operations ended below its success
    /// threshold.
    #[error("too few results: {got} of {required} required")]
    TooFewResults { got: usize, required: usize },
}
