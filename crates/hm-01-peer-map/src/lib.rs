//! # Peer Map
//!
//! The routing table of a HiveMesh node: 160 XOR-distance buckets, each with
//! a small bag of verified peers and a FIFO bag of unverified overflow
//! candidates. Feeds closest-set queries to iterative routing and mutation
//! events to the replication controller.
//!
//! Layout follows the workspace convention: `domain` is pure and clock-free,
//! `service` adds the shared lock, the time source and listener fan-out.

pub mod domain;
pub mod ports;
pub mod service;

pub use domain::{
    AddOutcome, FailureKind, FailureOutcome, MaintenanceReport, PeerMap, PeerMapConfig,
    PeerMapError, PeerMapStats, RemoveReason, NUM_BUCKETS,
};
pub use ports::PeerMapListener;
pub use service::PeerMapService;
