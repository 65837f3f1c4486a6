//! Discovered peers, keyed by node id and bounded by a staleness window.

use crate::beacon::DiscoveryBeacon;
use mesh_transport::TransportKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// What we know about a peer from its beacons
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    /// Peer's node id
    pub node_id: String,
    /// Local time of the last beacon
    pub last_seen: Instant,
    /// Media the peer was heard on
    pub transports: BTreeSet<TransportKind>,
    /// Advertised capability tags
    pub capabilities: Vec<String>,
    /// Advertised protocol version
    pub mesh_version: String,
    /// Whether the last beacon carried key-exchange material
    pub offers_key_exchange: bool,
}

impl PeerInfo {
    /// Whether the peer advertises `capability`
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Registry snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Live peers
    pub peers: usize,
    /// Live peers per medium
    pub by_transport: HashMap<TransportKind, usize>,
    /// Peers evicted as stale since start
    pub evicted: u64,
}

/// Peer registry. Discovery only; trust comes from verified key bundles.
#[derive(Debug)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerInfo>,
    stale_after: Duration,
    evicted: u64,
}

impl PeerRegistry {
    /// Create an empty registry
    pub fn new(stale_after: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            stale_after,
            evicted: 0,
        }
    }

    /// Record a beacon heard on `transport`; returns true for a new peer
    pub fn observe(&mut self, beacon: &DiscoveryBeacon, transport: TransportKind) -> bool {
        let now = Instant::now();
        match self.peers.get_mut(&beacon.node_id) {
            Some(peer) => {
                peer.last_seen = now;
                peer.transports.insert(transport);
                peer.capabilities = beacon.capabilities.clone();
                peer.mesh_version = beacon.mesh_version.clone();
                peer.offers_key_exchange = beacon.key_exchange.is_some();
                debug!("Refreshed peer {} via {}", beacon.node_id, transport);
                false
            }
            None => {
                self.peers.insert(
                    beacon.node_id.clone(),
                    PeerInfo {
                        node_id: beacon.node_id.clone(),
                        last_seen: now,
                        transports: BTreeSet::from([transport]),
                        capabilities: beacon.capabilities.clone(),
                        mesh_version: beacon.mesh_version.clone(),
                        offers_key_exchange: beacon.key_exchange.is_some(),
                    },
                );
                info!("New peer discovered: {} via {}", beacon.node_id, transport);
                true
            }
        }
    }

    /// Evict peers not heard from within the staleness window
    pub fn cleanup(&mut self) -> Vec<String> {
        let now = Instant::now();
        let stale_after = self.stale_after;
        let stale: Vec<String> = self
            .peers
            .values()
            .filter(|peer| now.duration_since(peer.last_seen) > stale_after)
            .map(|peer| peer.node_id.clone())
            .collect();

        for node_id in &stale {
            self.peers.remove(node_id);
            debug!("Removed stale peer {}", node_id);
        }
        self.evicted += stale.len() as u64;
        stale
    }

    /// Look up one peer
    pub fn peer(&self, node_id: &str) -> Option<&PeerInfo> {
        self.peers.get(node_id)
    }

    /// All peers, sorted by node id
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        peers
    }

    /// Peers heard on `kind`, sorted by node id
    pub fn peers_by_transport(&self, kind: TransportKind) -> Vec<PeerInfo> {
        self.peers()
            .into_iter()
            .filter(|peer| peer.transports.contains(&kind))
            .collect()
    }

    /// Up to `max` peers advertising `capability`, best first.
    ///
    /// Peers reachable over a higher-priority medium rank first, then the
    /// most recently heard.
    pub fn best_peers(&self, capability: &str, max: usize) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .peers
            .values()
            .filter(|peer| peer.has_capability(capability))
            .cloned()
            .collect();
        peers.sort_by(|a, b| {
            let a_rank = a.transports.iter().map(|k| k.priority()).min();
            let b_rank = b.transports.iter().map(|k| k.priority()).min();
            a_rank
                .cmp(&b_rank)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        peers.truncate(max);
        peers
    }

    /// Live peer count
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer is known
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Registry snapshot
    pub fn stats(&self) -> RegistryStats {
        let mut by_transport = HashMap::new();
        for peer in self.peers.values() {
            for kind in &peer.transports {
                *by_transport.entry(*kind).or_insert(0) += 1;
            }
        }
        RegistryStats {
            peers: self.peers.len(),
            by_transport,
            evicted: self.evicted,
        }
    }
}
