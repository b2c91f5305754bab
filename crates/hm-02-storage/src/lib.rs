//! # Storage Layer
//!
//! The keyed store of a HiveMesh node: entries addressed by 640-bit
//! composite keys, TTL expiry driven by a secondary deadline index,
//! domain/entry access protection via public-key hashing, range scans and
//! digests, and the responsibility map the replication controller works
//! from.
//!
//! `domain` is the pure backend; `locks` implements the four-tier keyed
//! lock hierarchy; `service` combines the two behind an async API.

pub mod domain;
pub mod locks;
pub mod service;

pub use domain::{
    DataEntry, DataType, DigestInfo, MemoryStore, ProtectionEnable, RemoveOutcome, StorageConfig,
    StorageResult,
};
pub use locks::{FootprintGuard, KeyedRwLock, StorageLocks};
pub use service::StorageLayer;
