use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CLIENTS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seats including the host's own; a host accepts `max_clients - 1` peers.
    pub max_clients: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Changed snapshots are held back until this much time has passed since
    /// the entity was last sent. Zero sends every change on the next tick.
    pub min_update_interval_ms: u64,
    /// Unchanged entities are resent after this long; `None` disables it.
    pub keepalive_interval_ms: Option<u64>,
    /// Number of network ids available per peer, at most 65 536.
    pub id_capacity: usize,
}

impl ReplicationConfig {
    pub fn min_update_interval(&self) -> Duration {
        Duration::from_millis(self.min_update_interval_ms)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive_interval_ms.map(Duration::from_millis)
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            min_update_interval_ms: 0,
            keepalive_interval_ms: Some(1000),
            id_capacity: crate::replication::NETWORK_ID_SPACE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub handshake_retry_ms: u64,
    pub ping_interval_ms: u64,
    pub min_resend_ms: u64,
    pub max_resend_ms: u64,
    /// Unacknowledged fragments allowed in flight before frames queue locally.
    pub max_in_flight: usize,
    /// Handshakes allowed to be pending at once on a listening transport.
    pub max_pending: usize,
}

impl LinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_retry(&self) -> Duration {
        Duration::from_millis(self.handshake_retry_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn min_resend(&self) -> Duration {
        Duration::from_millis(self.min_resend_ms)
    }

    pub fn max_resend(&self) -> Duration {
        Duration::from_millis(self.max_resend_ms)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            handshake_retry_ms: 250,
            ping_interval_ms: 250,
            min_resend_ms: 50,
            max_resend_ms: 1_000,
            max_in_flight: 256,
            max_pending: 32,
        }
    }
}
