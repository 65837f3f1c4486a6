//! Router tunables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry attempts a queued packet gets before it is dropped
pub const MAX_RETRIES: u32 = 3;

/// Process-wide mesh tunables, changed only through [`MeshConfig::apply`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Deliver immediately and retry on a timer. When false, packets are only queued.
    pub auto_mode: bool,
    /// Largest hop limit a message may request
    pub max_hops: u8,
    /// How long a queued packet stays deliverable
    #[serde(with = "mesh_transport::humantime_duration")]
    pub default_ttl: Duration,
    /// Queue bound; the oldest entry is evicted beyond it
    pub max_queue_size: usize,
    /// Period of the retry timer
    #[serde(with = "mesh_transport::humantime_duration")]
    pub retry_interval: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            auto_mode: true,
            max_hops: 5,
            default_ttl: Duration::from_secs(3600),
            max_queue_size: 100,
            retry_interval: Duration::from_secs(5),
        }
    }
}

impl MeshConfig {
    /// Apply the fields set in `update`
    pub fn apply(&mut self, update: &ConfigUpdate) {
        if let Some(auto_mode) = update.auto_mode {
            self.auto_mode = auto_mode;
        }
        if let Some(max_hops) = update.max_hops {
            self.max_hops = max_hops;
        }
        if let Some(ttl) = update.default_ttl {
            self.default_ttl = ttl;
        }
        if let Some(size) = update.max_queue_size {
            self.max_queue_size = size;
        }
        if let Some(interval) = update.retry_interval {
            self.retry_interval = interval;
        }
    }
}

/// Partial override for [`MeshConfig`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    /// New auto mode
    pub auto_mode: Option<bool>,
    /// New hop ceiling
    pub max_hops: Option<u8>,
    /// New queue TTL
    pub default_ttl: Option<Duration>,
    /// New queue bound
    pub max_queue_size: Option<usize>,
    /// New retry period
    pub retry_interval: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::default();
        assert!(config.auto_mode);
        assert_eq!(config.max_hops, 5);
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.max_queue_size, 100);
        assert_eq!(config.retry_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_apply_only_touches_set_fields() {
        let mut config = MeshConfig::default();
        config.apply(&ConfigUpdate {
            auto_mode: Some(false),
            max_queue_size: Some(10),
            ..Default::default()
        });
        assert!(!config.auto_mode);
        assert_eq!(config.max_queue_size, 10);
        assert_eq!(config.max_hops, 5);
        assert_eq!(config.retry_interval, Duration::from_secs(5));
    }
}
