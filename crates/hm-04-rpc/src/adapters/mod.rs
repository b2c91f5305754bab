//! Transport adapters. Only the in-memory wire lives in the workspace; a
//! real socket multiplexer implements the same ports externally.

pub mod memory;

pub use memory::{MemoryChannel, MemoryNetwork, MemoryWire};
