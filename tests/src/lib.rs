//! # HiveMesh Test Suite
//!
//! Cross-subsystem scenarios exercising whole peers over the in-memory
//! network: bootstrap meshes, replicated put/get under churn, TTL expiry,
//! protection conflicts, relay round trips and codec streaming.
//!
//! ```bash
//! cargo test -p hm-tests
//! ```

#![allow(dead_code)]

pub mod integration;
