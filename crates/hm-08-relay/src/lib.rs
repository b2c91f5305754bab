//! # Relay Subsystem
//!
//! Peers behind firewalls keep long-lived connections to relay peers. The
//! relay installs a forwarder keyed by the unreachable peer's id, answers
//! NEIGHBORS on its behalf from its own map, and pipes everything else over
//! the established channel. The client side selects relays, registers, and
//! keeps its advertised relayed address current.

pub mod client;
pub mod config;
pub mod forwarder;
pub mod handler;

pub use client::{RelayClient, RelayError};
pub use config::RelayConfig;
pub use forwarder::RelayForwarder;
pub use handler::RelayRpcHandler;
