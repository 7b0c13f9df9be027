//! Configuration carried by `Context::init` (spec.md §6). Every numeric
//! policy knob spec.md leaves as "an implementation choice but must be
//! stable and documented" gets its default pinned here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::peer::TransportPreference;
use crate::transport::{TransportKind, TransportSet};

pub const MAX_NAME_LEN: usize = 31;
pub const DEFAULT_SLOT_MAX: usize = 256;
pub const DEFAULT_QUEUE_CAPACITY_PER_PRIORITY: usize = 4;
pub const DEFAULT_MESSAGE_MAX: u32 = peertalk_protocol::DEFAULT_MESSAGE_MAX;

pub const DISCOVERY_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(10);
pub const DISCOVERY_FRESHNESS_TIMEOUT: Duration = Duration::from_secs(30);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const GRACEFUL_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Queue pressure bands (spec.md §4.2): stable, documented thresholds.
pub const QUEUE_PRESSURE_WARNING: u8 = 75;
pub const QUEUE_PRESSURE_BLOCKING: u8 = 95;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbpDefaults {
    pub object_type: String,
    pub zone: String,
}

impl Default for NbpDefaults {
    fn default() -> Self {
        Self {
            object_type: "PeerTalk".to_string(),
            zone: "*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// This host's display name, truncated/validated to `MAX_NAME_LEN`.
    pub local_name: String,
    pub max_peers: usize,
    pub discovery_port: u16,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub transports: TransportSet,
    pub transport_preference: TransportPreference,
    pub nbp_defaults: NbpDefaults,
    /// Case-insensitive name-based dedup on discovery (spec.md §4.1).
    pub auto_merge_peers: bool,

    pub slot_max: usize,
    pub message_max: u32,
    pub queue_capacity_per_priority: usize,

    pub discovery_announce_interval: Duration,
    pub discovery_freshness_timeout: Duration,
    pub connect_timeout: Duration,
    pub graceful_close_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_name: "peertalk".to_string(),
            max_peers: 32,
            discovery_port: 7353,
            tcp_port: 7354,
            udp_port: 7355,
            transports: TransportSet::from_iter([TransportKind::Tcp, TransportKind::Udp]),
            transport_preference: TransportPreference::PreferTcp,
            nbp_defaults: NbpDefaults::default(),
            auto_merge_peers: true,
            slot_max: DEFAULT_SLOT_MAX,
            message_max: DEFAULT_MESSAGE_MAX,
            queue_capacity_per_priority: DEFAULT_QUEUE_CAPACITY_PER_PRIORITY,
            discovery_announce_interval: DISCOVERY_ANNOUNCE_INTERVAL,
            discovery_freshness_timeout: DISCOVERY_FRESHNESS_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            graceful_close_timeout: GRACEFUL_CLOSE_TIMEOUT,
        }
    }
}

impl Config {
    pub fn validated_name(&self, name: &str) -> crate::error::Result<String> {
        if name.chars().count() > MAX_NAME_LEN || name.is_empty() {
            return Err(crate::error::Error::InvalidArg("name length"));
        }
        Ok(name.to_string())
    }
}
