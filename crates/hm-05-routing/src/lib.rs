//! # Iterative Routing
//!
//! The α-parallel iterative closest-node search feeding every distributed
//! operation: seed from the local peer map, fan NEIGHBORS queries toward the
//! closest unasked candidates, merge answers, settle on the k closest
//! responders.

pub mod config;
pub mod router;
pub mod state;

pub use config::{OperationKind, RoutingConfig};
pub use router::{IterativeRouter, RoutingResult};
pub use state::RoutingState;
