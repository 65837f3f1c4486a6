//! Beacon broadcasting and handling.

use crate::beacon::{BeaconError, DiscoveryBeacon, DEFAULT_CAPABILITIES};
use crate::registry::{PeerInfo, PeerRegistry, RegistryStats};
use bytes::Bytes;
use mesh_session::{SessionError, SessionManager};
use mesh_transport::{Transport, TransportKind};
use mesh_wire::encode_beacon_frame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Discovery tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Run the beacon timer
    pub enabled: bool,
    /// Period between beacons
    #[serde(with = "mesh_transport::humantime_duration")]
    pub beacon_interval: Duration,
    /// Peers silent for longer than this are evicted
    #[serde(with = "mesh_transport::humantime_duration")]
    pub stale_after: Duration,
    /// Capability tags to advertise
    pub capabilities: Vec<String>,
    /// Include the key-bundle payload in beacons
    pub share_key_bundle: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            beacon_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(60),
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            share_key_bundle: true,
        }
    }
}

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Beacon could not be encoded or decoded
    #[error(transparent)]
    Beacon(#[from] BeaconError),
    /// Key material in a beacon was rejected
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Something discovery observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// First beacon from a peer
    PeerDiscovered {
        /// Peer's node id
        node_id: String,
        /// Medium it was heard on
        transport: TransportKind,
    },
    /// Peer evicted as stale
    PeerLost {
        /// Peer's node id
        node_id: String,
    },
    /// Unverified contact created from beacon key material
    ContactAdded {
        /// Peer's node id
        node_id: String,
        /// Peer's identity fingerprint
        fingerprint: String,
    },
}

/// Broadcasts our presence and tracks everyone else's
pub struct PeerDiscovery {
    config: DiscoveryConfig,
    sessions: Arc<SessionManager>,
    transports: Vec<Arc<dyn Transport>>,
    registry: RwLock<PeerRegistry>,
    events: broadcast::Sender<DiscoveryEvent>,
    beacon_task: Mutex<Option<JoinHandle<()>>>,
}

impl PeerDiscovery {
    /// Create a discovery service over `transports`
    pub fn new(
        config: DiscoveryConfig,
        sessions: Arc<SessionManager>,
        transports: Vec<Arc<dyn Transport>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry: RwLock::new(PeerRegistry::new(config.stale_after)),
            config,
            sessions,
            transports,
            events,
            beacon_task: Mutex::new(None),
        }
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// Build our current beacon
    pub async fn beacon(&self) -> DiscoveryBeacon {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let beacon = DiscoveryBeacon::new(
            self.sessions.node_id(),
            now_ms,
            self.config.capabilities.clone(),
        );
        if self.config.share_key_bundle {
            beacon.with_key_exchange(self.sessions.key_bundle_payload(now_ms).await)
        } else {
            beacon
        }
    }

    /// Send one beacon on every available transport it fits; returns how many accepted it
    pub async fn broadcast_beacon(&self) -> Result<usize, DiscoveryError> {
        let frame = encode_beacon_frame(&self.beacon().await.encode()?);

        let mut sent = 0;
        for transport in &self.transports {
            if !transport.available() || frame.len() > transport.max_packet_size() {
                continue;
            }
            match transport.send(frame.clone()).await {
                Ok(()) => sent += 1,
                Err(e) => debug!("Beacon on {} failed: {}", transport.kind(), e),
            }
        }
        debug!("Broadcast {} byte beacon on {} transports", frame.len(), sent);
        Ok(sent)
    }

    /// Process a beacon body received on `transport`.
    ///
    /// Key material only creates a contact when none exists under that id;
    /// discovery never replaces or upgrades an existing contact.
    pub async fn handle_beacon(
        &self,
        body: Bytes,
        transport: TransportKind,
    ) -> Result<(), DiscoveryError> {
        let beacon = DiscoveryBeacon::decode(&body)?;
        if beacon.node_id == self.sessions.node_id() {
            return Ok(());
        }

        let is_new = self.registry.write().await.observe(&beacon, transport);
        if is_new {
            let _ = self.events.send(DiscoveryEvent::PeerDiscovered {
                node_id: beacon.node_id.clone(),
                transport,
            });
        }

        let Some(payload) = beacon.key_exchange.as_ref() else {
            return Ok(());
        };
        if self.sessions.has_contact(&beacon.node_id) {
            return Ok(());
        }

        let bundle = payload.to_bundle()?;
        match self.sessions.add_contact_if_absent(&beacon.node_id, bundle).await {
            Ok(Some(contact)) => {
                info!("Added contact {} from beacon", beacon.node_id);
                let _ = self.events.send(DiscoveryEvent::ContactAdded {
                    node_id: contact.id,
                    fingerprint: contact.fingerprint,
                });
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!("Failed to add contact {} from beacon: {}", beacon.node_id, e);
                Err(e.into())
            }
        }
    }

    /// Evict stale peers
    pub async fn cleanup(&self) -> Vec<String> {
        let lost = self.registry.write().await.cleanup();
        for node_id in &lost {
            let _ = self.events.send(DiscoveryEvent::PeerLost {
                node_id: node_id.clone(),
            });
        }
        lost
    }

    /// Start the beacon timer. Each tick broadcasts a beacon and evicts stale peers.
    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.beacon_task.lock().await;
        if handle.is_some() {
            warn!("Peer discovery already running");
            return;
        }

        let period = self.config.beacon_interval;
        let discovery = Arc::downgrade(self);
        *handle = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(discovery) = discovery.upgrade() else {
                    break;
                };
                if let Err(e) = discovery.broadcast_beacon().await {
                    warn!("Failed to broadcast beacon: {}", e);
                }
                discovery.cleanup().await;
            }
        }));
        info!("Started peer discovery (beacon every {:?})", period);
    }

    /// Stop the beacon timer
    pub async fn stop(&self) {
        if let Some(handle) = self.beacon_task.lock().await.take() {
            handle.abort();
            info!("Stopped peer discovery");
        }
    }

    /// All live peers
    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.registry.read().await.peers()
    }

    /// Peers heard on `kind`
    pub async fn peers_by_transport(&self, kind: TransportKind) -> Vec<PeerInfo> {
        self.registry.read().await.peers_by_transport(kind)
    }

    /// Up to `max` peers advertising `capability`, best first
    pub async fn best_peers(&self, capability: &str, max: usize) -> Vec<PeerInfo> {
        self.registry.read().await.best_peers(capability, max)
    }

    /// Registry snapshot
    pub async fn stats(&self) -> RegistryStats {
        self.registry.read().await.stats()
    }
}
