// Engine Settings - knobs tunable without code changes
//
// Deserialized by the daemon from its layered configuration; every field has
// a default so partial TOML sections are accepted.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Re-scan interval for `continuous` jobs
    pub discovery_interval_secs: u64,
    /// Scheduler wait when nothing is claimable yet (e.g. only delayed retries remain)
    pub idle_poll_ms: u64,
    /// Ceiling applied to exponential retry delays
    pub max_backoff_secs: u64,
    /// Capacity of the status broadcast channel
    pub status_buffer: usize,
    pub sync: SyncSettings,
    pub pagination: PaginationSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            discovery_interval_secs: 30,
            idle_poll_ms: 100,
            max_backoff_secs: 600,
            status_buffer: 1024,
            sync: SyncSettings::default(),
            pagination: PaginationSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

/// Status synchronization channel timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub poll_interval_secs: u64,
    pub reconnect_cooldown_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Push channel silent for longer than this counts as disconnected
    pub heartbeat_timeout_secs: u64,
    /// Max messages returned by one poll
    pub poll_batch_limit: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            reconnect_cooldown_secs: 60,
            heartbeat_interval_secs: 15,
            heartbeat_timeout_secs: 45,
            poll_batch_limit: 500,
        }
    }
}

impl SyncSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_secs(self.reconnect_cooldown_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationSettings {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 200,
        }
    }
}
