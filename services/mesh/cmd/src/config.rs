//! Configuration handling for the sacred-mesh binary.
//!
//! Settings are read from a YAML file and then overridden by environment
//! variables; command-line flags are applied last by `main`.

use anyhow::Result;
use mesh_node::NodeConfig;
use mesh_transport::RelayConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Overrides the node id
pub const ENV_NODE_ID: &str = "SACRED_MESH_NODE_ID";
/// Sets the relay hub address, enabling the relay transport
pub const ENV_RELAY_ADDR: &str = "SACRED_MESH_RELAY_ADDR";
/// Sets the key store file
pub const ENV_KEY_STORE: &str = "SACRED_MESH_KEY_STORE";

/// Relay hub settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Listen address for the `relay` subcommand
    pub listen: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7700".to_string(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Node settings
    pub node: NodeConfig,
    /// Relay hub settings
    pub hub: HubConfig,
}

impl ServiceConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<ServiceConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?}, using defaults: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides();

        info!(
            "Final mesh configuration: node_id={}, relay={}, key_store={:?}, discovery={}",
            config.node.node_id,
            config
                .node
                .relay
                .as_ref()
                .map(|r| r.addr.as_str())
                .unwrap_or("none"),
            config.node.key_store,
            config.node.discovery.enabled
        );

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(node_id) = lookup(ENV_NODE_ID) {
            info!("Node ID overridden by environment: {}", node_id);
            self.node.node_id = node_id;
        }

        if let Some(addr) = lookup(ENV_RELAY_ADDR) {
            info!("Relay address overridden by environment: {}", addr);
            self.node.relay.get_or_insert_with(RelayConfig::default).addr = addr;
        }

        if let Some(path) = lookup(ENV_KEY_STORE) {
            info!("Key store overridden by environment: {}", path);
            self.node.key_store = Some(PathBuf::from(path));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.node.node_id, mesh_node::DEFAULT_NODE_ID);
        assert!(config.node.relay.is_none());
        assert!(config.node.mesh.auto_mode);
        assert_eq!(config.hub.listen, "0.0.0.0:7700");
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
node:
  node_id: alice
  key_store: /var/lib/sacred-mesh/alice.json
  mesh:
    max_queue_size: 50
    retry_interval: 10s
  relay:
    addr: relay.local:7700
    connect_timeout: 2s
  discovery:
    beacon_interval: 30s
hub:
  listen: 127.0.0.1:7800
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config: ServiceConfig = serde_yaml::from_str(yaml_content).unwrap();
        assert_eq!(config.node.node_id, "alice");
        assert_eq!(config.node.mesh.max_queue_size, 50);
        assert_eq!(config.node.mesh.retry_interval, Duration::from_secs(10));
        assert_eq!(config.node.mesh.max_hops, 5);

        let relay = config.node.relay.as_ref().unwrap();
        assert_eq!(relay.addr, "relay.local:7700");
        assert_eq!(relay.connect_timeout, Duration::from_secs(2));
        assert_eq!(relay.retry_backoff, Duration::from_secs(5));
        assert_eq!(config.node.discovery.beacon_interval, Duration::from_secs(30));
        assert_eq!(config.hub.listen, "127.0.0.1:7800");

        // The file path goes through the same parser
        let loaded = ServiceConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.hub, config.hub);
        assert_eq!(loaded.node.mesh, config.node.mesh);
    }

    #[test]
    fn test_missing_or_broken_file_uses_defaults() {
        let config = ServiceConfig::load_from_file("/nonexistent/sacred-mesh.yaml").unwrap();
        assert_eq!(config.hub, HubConfig::default());

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"node: [not, a, map").unwrap();
        let config = ServiceConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.node.mesh, mesh_routing::MeshConfig::default());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_NODE_ID, "bob"),
            (ENV_RELAY_ADDR, "10.0.0.2:7700"),
            (ENV_KEY_STORE, "/tmp/bob.json"),
        ]);

        let mut config = ServiceConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.node.node_id, "bob");
        let relay = config.node.relay.unwrap();
        assert_eq!(relay.addr, "10.0.0.2:7700");
        assert_eq!(relay.connect_timeout, RelayConfig::default().connect_timeout);
        assert_eq!(config.node.key_store, Some(PathBuf::from("/tmp/bob.json")));
    }

    #[test]
    fn test_relay_override_keeps_file_timeouts() {
        let mut config = ServiceConfig::default();
        config.node.relay = Some(RelayConfig {
            addr: "old:1".into(),
            connect_timeout: Duration::from_secs(9),
            retry_backoff: Duration::from_secs(1),
        });
        config.apply_overrides(|key| (key == ENV_RELAY_ADDR).then(|| "new:2".to_string()));

        let relay = config.node.relay.unwrap();
        assert_eq!(relay.addr, "new:2");
        assert_eq!(relay.connect_timeout, Duration::from_secs(9));
    }
}
