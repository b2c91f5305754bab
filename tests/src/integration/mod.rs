//! Cross-subsystem integration scenarios.

pub mod common;

#[cfg(test)]
mod bootstrap;
#[cfg(test)]
mod codec_stream;
#[cfg(test)]
mod direct;
#[cfg(test)]
mod relay;
#[cfg(test)]
mod replication;
#[cfg(test)]
mod storage_ops;
