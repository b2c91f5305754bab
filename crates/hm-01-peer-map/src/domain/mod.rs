//! Pure peer map logic: buckets, bags, failure accounting, closest-set
//! queries. No I/O and no clock reads; callers pass timestamps in.

pub mod config;
pub mod errors;
pub mod peer_map;

pub use config::PeerMapConfig;
pub use errors::PeerMapError;
pub use peer_map::{
    AddOutcome, FailureKind, FailureOutcome, MaintenanceReport, PeerEntry, PeerMap, PeerMapStats,
    RemoveReason, NUM_BUCKETS,
};
