//! TOML configuration provider.
//!
//! Loads a partial configuration file and merges it over the defaults, so a
//! deployment only writes the knobs it changes.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::config::{Capabilities, PeerConfig};

#[derive(Debug, Error)]
pub enum TomlConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] crate::config::ConfigError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCapabilities {
    ping: Option<bool>,
    storage: Option<bool>,
    neighbors: Option<bool>,
    direct_data: Option<bool>,
    quit: Option<bool>,
    peer_exchange: Option<bool>,
    broadcast: Option<bool>,
    relay: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    replication_factor: Option<usize>,
    bag_size: Option<usize>,
    storage_interval_millis: Option<u64>,
    interval_millis: Option<u64>,
    delay_millis: Option<u64>,
    alpha: Option<usize>,
    k: Option<usize>,
    max_permits_permanent_tcp: Option<usize>,
    max_permits_tcp: Option<usize>,
    max_permits_udp: Option<usize>,
    idle_timeout_millis: Option<u64>,
    behind_firewall: Option<bool>,
    max_relays: Option<usize>,
    min_relays: Option<usize>,
    #[serde(default)]
    capabilities: Option<RawCapabilities>,
}

fn merge(raw: RawConfig) -> PeerConfig {
    let defaults = PeerConfig::default();
    let capabilities = raw
        .capabilities
        .map(|caps| {
            let base = Capabilities::default();
            Capabilities {
                ping: caps.ping.unwrap_or(base.ping),
                storage: caps.storage.unwrap_or(base.storage),
                neighbors: caps.neighbors.unwrap_or(base.neighbors),
                direct_data: caps.direct_data.unwrap_or(base.direct_data),
                quit: caps.quit.unwrap_or(base.quit),
                peer_exchange: caps.peer_exchange.unwrap_or(base.peer_exchange),
                broadcast: caps.broadcast.unwrap_or(base.broadcast),
                relay: caps.relay.unwrap_or(base.relay),
            }
        })
        .unwrap_or_default();

    PeerConfig {
        replication_factor: raw.replication_factor.unwrap_or(defaults.replication_factor),
        bag_size: raw.bag_size.unwrap_or(defaults.bag_size),
        storage_interval_millis: raw
            .storage_interval_millis
            .unwrap_or(defaults.storage_interval_millis),
        interval_millis: raw.interval_millis.unwrap_or(defaults.interval_millis),
        delay_millis: raw.delay_millis.unwrap_or(defaults.delay_millis),
        alpha: raw.alpha.unwrap_or(defaults.alpha),
        k: raw.k.unwrap_or(defaults.k),
        max_permits_permanent_tcp: raw
            .max_permits_permanent_tcp
            .unwrap_or(defaults.max_permits_permanent_tcp),
        max_permits_tcp: raw.max_permits_tcp.unwrap_or(defaults.max_permits_tcp),
        max_permits_udp: raw.max_permits_udp.unwrap_or(defaults.max_permits_udp),
        idle_timeout_millis: raw.idle_timeout_millis.unwrap_or(defaults.idle_timeout_millis),
        behind_firewall: raw.behind_firewall.unwrap_or(defaults.behind_firewall),
        max_relays: raw.max_relays.unwrap_or(defaults.max_relays),
        min_relays: raw.min_relays.unwrap_or(defaults.min_relays),
        capabilities,
    }
}

/// Parse a configuration from TOML text.
pub fn parse_config(text: &str) -> Result<PeerConfig, TomlConfigError> {
    let raw: RawConfig = toml::from_str(text)?;
    let config = merge(raw);
    config.validate()?;
    Ok(config)
}

/// Load a configuration file, merging it over the defaults.
pub fn load_config(path: &Path) -> Result<PeerConfig, TomlConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| TomlConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&text)
}
