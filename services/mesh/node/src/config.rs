//! Node configuration.

use mesh_discovery::DiscoveryConfig;
use mesh_routing::MeshConfig;
use mesh_transport::RelayConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Node id used when none is configured
pub const DEFAULT_NODE_ID: &str = "sacred-node";

/// Everything needed to build a [`crate::SacredMesh`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's id, hashed into every packet header
    pub node_id: String,
    /// Router tunables
    pub mesh: MeshConfig,
    /// Relay hub to connect to, if any
    pub relay: Option<RelayConfig>,
    /// Beacon and registry tunables
    pub discovery: DiscoveryConfig,
    /// Key store file; keys are kept in memory when unset
    pub key_store: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: DEFAULT_NODE_ID.to_string(),
            mesh: MeshConfig::default(),
            relay: None,
            discovery: DiscoveryConfig::default(),
            key_store: None,
        }
    }
}

impl NodeConfig {
    /// Default configuration for `node_id`
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
node_id: alice
mesh:
  max_queue_size: 20
  retry_interval: 2s
relay:
  addr: relay.example.org:7700
discovery:
  enabled: false
"#;
        let config: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.node_id, "alice");
        assert_eq!(config.mesh.max_queue_size, 20);
        assert_eq!(config.mesh.retry_interval, Duration::from_secs(2));
        assert_eq!(config.mesh.default_ttl, Duration::from_secs(3600));

        let relay = config.relay.unwrap();
        assert_eq!(relay.addr, "relay.example.org:7700");
        assert_eq!(relay.connect_timeout, Duration::from_secs(5));
        assert!(!config.discovery.enabled);
        assert!(config.key_store.is_none());
    }
}
