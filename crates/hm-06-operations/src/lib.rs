//! # DHT Operations
//!
//! The distributed PUT/ADD/GET/REMOVE/DIGEST/SEND-DIRECT wrappers: iterative
//! routing to the location key, fan-out to the replica set, voting
//! evaluation of the raw per-peer results. Also hosts the server-side RPC
//! handlers and the broadcast dispatcher.

pub mod broadcast;
pub mod handlers;
pub mod operations;
pub mod ports;
pub mod voting;

pub use broadcast::{BroadcastConfig, BroadcastDispatcher};
pub use handlers::{
    BroadcastRpcHandler, DirectHandler, NeighborsHandler, PeerExchangeHandler, PingHandler,
    QuitHandler, StorageHandler,
};
pub use operations::{DhtOperations, OperationsConfig, WriteReport};
pub use ports::{BroadcastHandler, DirectDataHandler, NoopHandler};
pub use voting::{evaluate_digests, evaluate_entries, evaluate_keys};
