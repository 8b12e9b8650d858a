use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether::{DEFAULT_MAX_CLIENTS, DEFAULT_PORT, DEFAULT_TICK_RATE, LinkConfig, ReplicationConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub bind: String,
    pub port: u16,
    /// Host address to join; hosts a session when unset.
    pub join: Option<String>,
    pub tick_rate: u32,
    pub max_clients: usize,
    /// Bodies this process simulates and replicates.
    pub entities: usize,
    /// Stop after this many seconds; runs until killed when unset.
    pub duration_secs: Option<u64>,
    pub stats_interval_secs: u64,
    pub replication: ReplicationConfig,
    pub link: LinkConfig,
}

impl HostConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            join: None,
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: DEFAULT_MAX_CLIENTS,
            entities: 8,
            duration_secs: None,
            stats_interval_secs: 5,
            replication: ReplicationConfig::default(),
            link: LinkConfig::default(),
        }
    }
}
