//! # Replication Controller
//!
//! Indirect replication: a responsibility tracker driven by peer map events
//! plus a periodic sweep that re-publishes owned items to the current
//! closest R-1 peers. The replication factor itself is refreshed each sweep
//! through a pluggable strategy.

pub mod config;
pub mod controller;
pub mod ports;

pub use config::{
    AdaptiveReplication, ConstantReplication, ReplicationConfig, ReplicationStrategy,
};
pub use controller::ReplicationController;
pub use ports::ReplicaSender;
