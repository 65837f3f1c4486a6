//! Presence beacon carried in BEACON frames.

use mesh_session::KeyBundlePayload;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol version advertised in beacons
pub const MESH_VERSION: &str = "1.0.0";

/// Capabilities advertised when none are configured
pub const DEFAULT_CAPABILITIES: [&str; 3] = ["mesh", "sigils", "e2ee"];

/// Beacon codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BeaconError {
    /// CBOR encoding failed
    #[error("beacon encoding failed: {0}")]
    Encode(String),
    /// CBOR decoding failed
    #[error("malformed beacon: {0}")]
    Decode(String),
}

/// "I am here, and this is how to reach me securely"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryBeacon {
    /// Sender's node id
    #[serde(rename = "id")]
    pub node_id: String,
    /// Unix milliseconds when the beacon was built
    #[serde(rename = "ts")]
    pub timestamp: u64,
    /// Capability tags
    #[serde(rename = "c")]
    pub capabilities: Vec<String>,
    /// Key-bundle payload for opportunistic session setup
    #[serde(rename = "k", default, skip_serializing_if = "Option::is_none")]
    pub key_exchange: Option<KeyBundlePayload>,
    /// Mesh protocol version
    #[serde(rename = "v")]
    pub mesh_version: String,
}

impl DiscoveryBeacon {
    /// Build a beacon for the current protocol version
    pub fn new(node_id: impl Into<String>, timestamp: u64, capabilities: Vec<String>) -> Self {
        Self {
            node_id: node_id.into(),
            timestamp,
            capabilities,
            key_exchange: None,
            mesh_version: MESH_VERSION.to_string(),
        }
    }

    /// Attach key-exchange material
    pub fn with_key_exchange(mut self, payload: KeyBundlePayload) -> Self {
        self.key_exchange = Some(payload);
        self
    }

    /// Whether the beacon advertises `capability`
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Encode as CBOR
    pub fn encode(&self) -> Result<Vec<u8>, BeaconError> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(self, &mut out).map_err(|e| BeaconError::Encode(e.to_string()))?;
        Ok(out)
    }

    /// Decode from CBOR
    pub fn decode(bytes: &[u8]) -> Result<Self, BeaconError> {
        ciborium::de::from_reader(bytes).map_err(|e| BeaconError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Vec<String> {
        DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_beacon_without_keys_is_small() {
        let beacon = DiscoveryBeacon::new("alice", 1_700_000_000_000, caps());
        let encoded = beacon.encode().unwrap();
        assert!(encoded.len() < 64, "beacon is {} bytes", encoded.len());
        assert_eq!(DiscoveryBeacon::decode(&encoded).unwrap(), beacon);
    }

    #[test]
    fn test_key_exchange_carried() {
        let payload = KeyBundlePayload {
            identity: vec![1; 32],
            pre_key: vec![2; 32],
            signature: vec![3; 64],
            timestamp: 5,
        };
        let beacon = DiscoveryBeacon::new("bob", 1, caps()).with_key_exchange(payload.clone());
        let decoded = DiscoveryBeacon::decode(&beacon.encode().unwrap()).unwrap();
        assert_eq!(decoded.key_exchange, Some(payload));
        assert!(decoded.has_capability("e2ee"));
        assert!(!decoded.has_capability("lora"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            DiscoveryBeacon::decode(&[0xff, 0x00, 0x13]),
            Err(BeaconError::Decode(_))
        ));
    }
}
