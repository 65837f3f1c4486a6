//! The mesh facade.

use crate::config::NodeConfig;
use crate::error::MeshError;
use crate::events::{MeshEvent, MeshStatus, ReceivedMessage};
use dashmap::DashMap;
use mesh_crypto::{hash_sender_id, EphemeralKeyPair, IdentityKeyPair, SenderIdHash};
use mesh_discovery::{PeerDiscovery, PeerInfo};
use mesh_routing::{ConfigUpdate, MeshConfig, Router, SendOutcome, TransportStatus};
use mesh_session::{ContactInfo, KeyBundle, KeyBundlePayload, SessionManager};
use mesh_storage::{FileKeyStore, KeyStore, MemoryKeyStore, StoredKeys};
use mesh_transport::{
    DirectRadioTransport, LongRangeBridgeTransport, RelayTransport, Transport,
};
use mesh_wire::{unix_now, MeshMessage};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MESSAGE_CHANNEL_CAPACITY: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Components that exist only between `initialize()` and `disconnect()`
pub(crate) struct Running {
    pub(crate) node_hash: SenderIdHash,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) router: Arc<Router>,
    pub(crate) discovery: Arc<PeerDiscovery>,
    /// Next outbound header counter
    pub(crate) counter: AtomicU32,
    /// Highest authenticated counter per sender
    pub(crate) last_seen: DashMap<SenderIdHash, u32>,
    /// Serializes counter assignment, encryption and hand-off to the router
    pub(crate) send_lock: Mutex<()>,
    pub(crate) messages: broadcast::Sender<ReceivedMessage>,
    pub(crate) events: broadcast::Sender<MeshEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A mesh node: the single entry point for applications
pub struct SacredMesh {
    config: NodeConfig,
    mesh_config: RwLock<MeshConfig>,
    transports: Vec<Arc<dyn Transport>>,
    key_store: Arc<dyn KeyStore>,
    running: RwLock<Option<Arc<Running>>>,
    messages: broadcast::Sender<ReceivedMessage>,
    events: broadcast::Sender<MeshEvent>,
}

impl SacredMesh {
    /// Node with the transports and key store described by `config`.
    ///
    /// The relay is added when configured; the radio transports are always
    /// present and report unavailable until hardware support exists.
    pub fn new(config: NodeConfig) -> Self {
        let mut transports: Vec<Arc<dyn Transport>> = Vec::new();
        if let Some(relay) = &config.relay {
            transports.push(Arc::new(RelayTransport::new(relay.clone())));
        }
        transports.push(Arc::new(DirectRadioTransport::new()));
        transports.push(Arc::new(LongRangeBridgeTransport::new()));
        Self::with_transports(config, transports)
    }

    /// Node over an explicit set of transports
    pub fn with_transports(config: NodeConfig, transports: Vec<Arc<dyn Transport>>) -> Self {
        let key_store: Arc<dyn KeyStore> = match &config.key_store {
            Some(path) => Arc::new(FileKeyStore::new(path.clone())),
            None => Arc::new(MemoryKeyStore::new()),
        };
        let (messages, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            mesh_config: RwLock::new(config.mesh.clone()),
            config,
            transports,
            key_store,
            running: RwLock::new(None),
            messages,
            events,
        }
    }

    /// Replace the key store chosen from the configuration
    pub fn with_key_store(mut self, key_store: Arc<dyn KeyStore>) -> Self {
        self.key_store = key_store;
        self
    }

    /// Configured node id
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Load or create keys, connect transports and start the timers.
    /// Calling it again while running is a no-op.
    pub async fn initialize(&self) -> Result<(), MeshError> {
        let mut running = self.running.write().await;
        if running.is_some() {
            warn!("Mesh node {} already initialized", self.config.node_id);
            return Ok(());
        }

        let (identity, signed_pre_key) = self.load_or_create_keys().await?;
        let sessions = Arc::new(SessionManager::new(
            self.config.node_id.clone(),
            identity,
            signed_pre_key,
        )?);

        let mesh_config = self.mesh_config.read().await.clone();
        let router = Arc::new(Router::new(mesh_config, self.transports.clone()));
        router.connect().await;
        let inbound = router.attach_inbound().await;

        let discovery = Arc::new(PeerDiscovery::new(
            self.config.discovery.clone(),
            sessions.clone(),
            router.transports().to_vec(),
        ));

        let state = Arc::new(Running {
            node_hash: hash_sender_id(&self.config.node_id),
            sessions,
            router,
            discovery,
            counter: AtomicU32::new(initial_counter()),
            last_seen: DashMap::new(),
            send_lock: Mutex::new(()),
            messages: self.messages.clone(),
            events: self.events.clone(),
            tasks: Mutex::new(Vec::new()),
        });

        state.router.start_retry_task().await;
        if self.config.discovery.enabled {
            state.discovery.start().await;
        }
        let inbound_task = Running::spawn_inbound(&state, inbound);
        let discovery_task = Running::spawn_discovery_forwarder(&state);
        state.tasks.lock().await.extend([inbound_task, discovery_task]);

        info!(
            "Sacred mesh node {} initialized (fingerprint {})",
            self.config.node_id,
            state.sessions.fingerprint()
        );
        *running = Some(state);
        Ok(())
    }

    async fn load_or_create_keys(&self) -> Result<(IdentityKeyPair, EphemeralKeyPair), MeshError> {
        if let Some(stored) = self.key_store.load().await? {
            if stored.node_id != self.config.node_id {
                warn!(
                    "Key store belongs to node {}, using it for {}",
                    stored.node_id, self.config.node_id
                );
            }
            return Ok((
                IdentityKeyPair::from_secret_bytes(&stored.identity_secret),
                EphemeralKeyPair::from_secret_bytes(stored.signed_pre_key_secret),
            ));
        }

        let identity = IdentityKeyPair::generate()?;
        let signed_pre_key = EphemeralKeyPair::generate()?;
        self.key_store
            .store(&StoredKeys {
                node_id: self.config.node_id.clone(),
                identity_secret: *identity.secret_bytes(),
                signed_pre_key_secret: *signed_pre_key.secret_bytes(),
                created_at: unix_now(),
            })
            .await?;
        info!("Created new identity for node {}", self.config.node_id);
        Ok((identity, signed_pre_key))
    }

    async fn state(&self) -> Result<Arc<Running>, MeshError> {
        self.running
            .read()
            .await
            .clone()
            .ok_or(MeshError::NotInitialized)
    }

    /// Whether `initialize()` has completed and `disconnect()` has not been called
    pub async fn is_initialized(&self) -> bool {
        self.running.read().await.is_some()
    }

    /// Encrypt `message` for `recipient` and hand it to the router.
    ///
    /// Fails only for facade-level problems: not initialized, no session for
    /// the recipient, or a message that violates the payload contract.
    /// Transport failures end in [`SendOutcome::Queued`].
    pub async fn send(&self, message: &MeshMessage, recipient: &str) -> Result<SendOutcome, MeshError> {
        let state = self.state().await?;
        message.validate()?;
        let max_hops = self.mesh_config.read().await.max_hops;
        if message.hop_limit > max_hops {
            return Err(MeshError::InvalidMessage(format!(
                "hop limit {} exceeds maximum {}",
                message.hop_limit, max_hops
            )));
        }
        if !state.sessions.has_contact(recipient) {
            return Err(MeshError::NoSession(recipient.to_string()));
        }

        let plaintext = message.encode()?;
        let outcome = state.send_payload(recipient, message, &plaintext).await?;
        let _ = self.events.send(MeshEvent::MessageSent {
            recipient: recipient.to_string(),
            outcome,
        });
        Ok(outcome)
    }

    /// Subscribe to decrypted inbound messages. Works before `initialize()`.
    pub fn on_message(&self) -> broadcast::Receiver<ReceivedMessage> {
        self.messages.subscribe()
    }

    /// Subscribe to lifecycle and traffic events
    pub fn subscribe_events(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    /// Verify `bundle` and open a session with it
    pub async fn add_contact(&self, contact_id: &str, bundle: KeyBundle) -> Result<ContactInfo, MeshError> {
        let state = self.state().await?;
        let contact = state.sessions.add_contact(contact_id, bundle).await?;
        let _ = self.events.send(MeshEvent::ContactAdded {
            id: contact.id.clone(),
            fingerprint: contact.fingerprint.clone(),
        });
        Ok(contact)
    }

    /// Add a contact from a key-bundle exchange payload (JSON)
    pub async fn import_contact(&self, contact_id: &str, payload_json: &str) -> Result<ContactInfo, MeshError> {
        let bundle = KeyBundlePayload::from_json(payload_json)
            .and_then(|payload| payload.to_bundle())
            .map_err(|e| MeshError::InvalidKeyBundle(e.to_string()))?;
        self.add_contact(contact_id, bundle).await
    }

    /// Known contacts, ordered by id
    pub async fn contacts(&self) -> Result<Vec<ContactInfo>, MeshError> {
        Ok(self.state().await?.sessions.contacts().await)
    }

    /// Identity fingerprint of a contact
    pub async fn contact_fingerprint(&self, contact_id: &str) -> Result<Option<String>, MeshError> {
        let state = self.state().await?;
        Ok(state.sessions.contact(contact_id).await.map(|c| c.fingerprint))
    }

    /// Forget a contact and its session
    pub async fn remove_contact(&self, contact_id: &str) -> Result<bool, MeshError> {
        let state = self.state().await?;
        let removed = state.sessions.remove_contact(contact_id);
        if removed {
            let _ = self.events.send(MeshEvent::ContactRemoved {
                id: contact_id.to_string(),
            });
        }
        Ok(removed)
    }

    /// Publishable key bundle with fresh one-time prekeys
    pub async fn generate_key_bundle(&self) -> Result<KeyBundle, MeshError> {
        Ok(self.state().await?.sessions.generate_key_bundle().await?)
    }

    /// Key-bundle exchange payload for out-of-band transfer
    pub async fn key_bundle_payload(&self) -> Result<KeyBundlePayload, MeshError> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Ok(self.state().await?.sessions.key_bundle_payload(now_ms).await)
    }

    /// Own identity fingerprint
    pub async fn fingerprint(&self) -> Result<String, MeshError> {
        Ok(self.state().await?.sessions.fingerprint())
    }

    /// Rotate the signed prekey and persist it
    pub async fn rotate_signed_pre_key(&self) -> Result<(), MeshError> {
        let state = self.state().await?;
        state.sessions.rotate_signed_pre_key().await?;

        if let Some(mut stored) = self.key_store.load().await? {
            stored.signed_pre_key_secret = *state.sessions.signed_pre_key_secret().await;
            self.key_store.store(&stored).await?;
        }
        info!("Rotated signed prekey for node {}", self.config.node_id);
        Ok(())
    }

    /// Live discovered peers
    pub async fn peers(&self) -> Result<Vec<PeerInfo>, MeshError> {
        Ok(self.state().await?.discovery.peers().await)
    }

    /// Status snapshot for operational tooling
    pub async fn get_status(&self) -> MeshStatus {
        let config = self.mesh_config.read().await.clone();
        let Ok(state) = self.state().await else {
            return MeshStatus {
                node_id: self.config.node_id.clone(),
                initialized: false,
                fingerprint: None,
                transports: self
                    .transports
                    .iter()
                    .map(|t| TransportStatus {
                        kind: t.kind(),
                        available: t.available(),
                        max_packet_size: t.max_packet_size(),
                        consecutive_failures: 0,
                        degraded: false,
                    })
                    .collect(),
                queue: None,
                router: None,
                contacts: 0,
                peers: 0,
                config,
            };
        };

        MeshStatus {
            node_id: self.config.node_id.clone(),
            initialized: true,
            fingerprint: Some(state.sessions.fingerprint()),
            transports: state.router.get_transport_status().await,
            queue: Some(state.router.get_queue_stats().await),
            router: Some(state.router.stats().await),
            contacts: state.sessions.contacts().await.len(),
            peers: state.discovery.peers().await.len(),
            config,
        }
    }

    /// Apply a partial router configuration change
    pub async fn update_config(&self, update: ConfigUpdate) {
        self.mesh_config.write().await.apply(&update);
        let running = self.running.read().await.clone();
        if let Some(state) = running {
            state.router.update_config(update).await;
        }
    }

    /// Stop all timers and close all transports. Safe to call at any time,
    /// including before `initialize()` and repeatedly.
    pub async fn disconnect(&self) {
        let Some(state) = self.running.write().await.take() else {
            debug!("Disconnect on idle mesh node {}", self.config.node_id);
            return;
        };

        state.discovery.stop().await;
        for task in state.tasks.lock().await.drain(..) {
            task.abort();
        }
        state.router.disconnect().await;
        info!("Sacred mesh node {} disconnected", self.config.node_id);
    }
}

/// First outbound counter. Seeded from the clock so that a restarted node
/// stays above the counters its peers last saw.
fn initial_counter() -> u32 {
    (unix_now() as u32).max(1)
}

impl Running {
    async fn send_payload(
        &self,
        recipient: &str,
        message: &MeshMessage,
        plaintext: &[u8],
    ) -> Result<SendOutcome, MeshError> {
        let _guard = self.send_lock.lock().await;
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        let packet = self
            .seal(recipient, message.group_id.is_some(), counter, plaintext)
            .await?;
        let ttl = std::time::Duration::from_secs(u64::from(message.ttl));
        Ok(self.router.send_with_ttl(&packet, Some(ttl)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ReceivedMessage;
    use bytes::Bytes;
    use mesh_session::SessionState;
    use mesh_transport::{InboundFrame, MemoryNetwork, MemoryTransport, TransportKind};
    use mesh_wire::MsgType;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn node(network: &MemoryNetwork, id: &str) -> (SacredMesh, Arc<MemoryTransport>) {
        let link = Arc::new(network.endpoint(TransportKind::Relay));
        let mut config = NodeConfig::for_node(id);
        config.discovery.enabled = false;
        let mesh = SacredMesh::with_transports(config, vec![link.clone() as Arc<dyn Transport>]);
        (mesh, link)
    }

    fn sigil_message() -> MeshMessage {
        MeshMessage::new(vec!["☉".to_string()], 0.8)
    }

    async fn recv(inbox: &mut broadcast::Receiver<ReceivedMessage>) -> ReceivedMessage {
        timeout(Duration::from_secs(30), inbox.recv())
            .await
            .expect("timed out waiting for message")
            .unwrap()
    }

    async fn connected_pair(network: &MemoryNetwork) -> (SacredMesh, SacredMesh, Arc<MemoryTransport>) {
        let (alice, _) = node(network, "alice");
        let (bob, bob_link) = node(network, "bob");
        alice.initialize().await.unwrap();
        bob.initialize().await.unwrap();
        let bundle = alice.generate_key_bundle().await.unwrap();
        bob.add_contact("alice", bundle).await.unwrap();
        (alice, bob, bob_link)
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_message_delivered_after_transport_returns() {
        let network = MemoryNetwork::new();
        let (alice, _) = node(&network, "alice");
        let (bob, bob_link) = node(&network, "bob");
        bob_link.set_available(false);
        alice.initialize().await.unwrap();
        bob.initialize().await.unwrap();
        let mut inbox = alice.on_message();

        let bundle = alice.generate_key_bundle().await.unwrap();
        bob.add_contact("alice", bundle).await.unwrap();

        let message = sigil_message();
        assert_eq!(bob.send(&message, "alice").await.unwrap(), SendOutcome::Queued);
        assert_eq!(bob.get_status().await.queue.unwrap().size, 1);

        bob_link.set_available(true);
        let received = recv(&mut inbox).await;
        assert_eq!(received.from, "bob");
        assert_eq!(received.message, message);
        assert_eq!(received.msg_type, MsgType::Handshake);
        assert_eq!(bob.get_status().await.queue.unwrap().size, 0);

        alice.disconnect().await;
        bob.disconnect().await;
    }

    #[tokio::test]
    async fn test_reply_establishes_session() {
        let network = MemoryNetwork::new();
        let (alice, bob, _) = connected_pair(&network).await;
        let mut alice_inbox = alice.on_message();
        let mut bob_inbox = bob.on_message();

        bob.send(&sigil_message(), "alice").await.unwrap();
        recv(&mut alice_inbox).await;

        let reply = sigil_message().with_note("received");
        alice.send(&reply, "bob").await.unwrap();
        let received = recv(&mut bob_inbox).await;
        assert_eq!(received.from, "alice");
        assert_eq!(received.message, reply);
        assert_eq!(received.msg_type, MsgType::Direct);

        let contacts = bob.contacts().await.unwrap();
        assert_eq!(contacts[0].state, SessionState::Established);

        bob.send(&sigil_message(), "alice").await.unwrap();
        assert_eq!(recv(&mut alice_inbox).await.msg_type, MsgType::Direct);
    }

    #[tokio::test]
    async fn test_replayed_and_tampered_frames_dropped() {
        let network = MemoryNetwork::new();
        let eve = network.endpoint(TransportKind::Relay);
        let (eve_tx, mut eve_rx) = mpsc::unbounded_channel::<InboundFrame>();
        eve.on_message(eve_tx).await;

        let (alice, bob, _) = connected_pair(&network).await;
        let mut inbox = alice.on_message();
        let mut events = alice.subscribe_events();

        bob.send(&sigil_message(), "alice").await.unwrap();
        recv(&mut inbox).await;
        let captured = eve_rx.recv().await.unwrap().bytes;

        // Exact replay
        eve.send(captured.clone()).await.unwrap();
        // Counter pushed forward without the key: fails authentication
        let mut forged = captured.to_vec();
        forged[18..22].copy_from_slice(&u32::MAX.to_be_bytes());
        eve.send(Bytes::from(forged)).await.unwrap();

        let second = sigil_message().with_note("second");
        bob.send(&second, "alice").await.unwrap();
        assert_eq!(recv(&mut inbox).await.message, second);

        let mut dropped = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, MeshEvent::PacketDropped { .. }) {
                dropped += 1;
            }
        }
        assert_eq!(dropped, 2);
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let network = MemoryNetwork::new();
        let (mesh, _) = node(&network, "alice");

        assert!(matches!(
            mesh.send(&sigil_message(), "bob").await,
            Err(MeshError::NotInitialized)
        ));
        assert!(matches!(mesh.fingerprint().await, Err(MeshError::NotInitialized)));

        let status = mesh.get_status().await;
        assert!(!status.initialized);
        assert_eq!(status.transports.len(), 1);

        mesh.disconnect().await;
        mesh.disconnect().await;
        assert!(!mesh.is_initialized().await);
    }

    #[tokio::test]
    async fn test_send_rejects_invalid_messages() {
        let network = MemoryNetwork::new();
        let (_alice, bob, _) = connected_pair(&network).await;

        let mut too_far = sigil_message();
        too_far.hop_limit = 6;
        assert!(matches!(
            bob.send(&too_far, "alice").await,
            Err(MeshError::InvalidMessage(_))
        ));
        assert!(matches!(
            bob.send(&MeshMessage::new(Vec::new(), 0.5), "alice").await,
            Err(MeshError::InvalidMessage(_))
        ));
        assert!(matches!(
            bob.send(&sigil_message(), "carol").await,
            Err(MeshError::NoSession(id)) if id == "carol"
        ));
    }

    #[tokio::test]
    async fn test_import_contact_checks_signature() {
        let network = MemoryNetwork::new();
        let (alice, _) = node(&network, "alice");
        let (bob, _) = node(&network, "bob");
        alice.initialize().await.unwrap();
        bob.initialize().await.unwrap();

        let mut payload = alice.key_bundle_payload().await.unwrap();
        payload.signature[0] ^= 0x01;
        let tampered = payload.to_json().unwrap();
        assert!(matches!(
            bob.import_contact("alice", &tampered).await,
            Err(MeshError::InvalidKeyBundle(_))
        ));
        assert!(bob.contacts().await.unwrap().is_empty());

        let json = alice.key_bundle_payload().await.unwrap().to_json().unwrap();
        bob.import_contact("alice", &json).await.unwrap();
        assert_eq!(
            bob.contact_fingerprint("alice").await.unwrap(),
            Some(alice.fingerprint().await.unwrap())
        );
        assert!(matches!(
            bob.import_contact("mallory", "{not json").await,
            Err(MeshError::InvalidKeyBundle(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_contact() {
        let network = MemoryNetwork::new();
        let (_alice, bob, _) = connected_pair(&network).await;
        let mut events = bob.subscribe_events();

        assert!(bob.remove_contact("alice").await.unwrap());
        assert!(!bob.remove_contact("alice").await.unwrap());
        assert_eq!(
            events.recv().await.unwrap(),
            MeshEvent::ContactRemoved { id: "alice".into() }
        );
        assert!(matches!(
            bob.send(&sigil_message(), "alice").await,
            Err(MeshError::NoSession(_))
        ));
    }

    #[tokio::test]
    async fn test_identity_persists_across_restarts() {
        let dir = TempDir::new().unwrap();
        let mut config = NodeConfig::for_node("alice");
        config.discovery.enabled = false;
        config.key_store = Some(dir.path().join("alice.json"));

        let first = SacredMesh::with_transports(config.clone(), Vec::new());
        first.initialize().await.unwrap();
        let fingerprint = first.fingerprint().await.unwrap();
        first.rotate_signed_pre_key().await.unwrap();
        let payload = first.key_bundle_payload().await.unwrap();
        first.disconnect().await;

        let second = SacredMesh::with_transports(config, Vec::new());
        second.initialize().await.unwrap();
        assert_eq!(second.fingerprint().await.unwrap(), fingerprint);
        assert_eq!(second.key_bundle_payload().await.unwrap().pre_key, payload.pre_key);
    }

    #[tokio::test]
    async fn test_manual_mode_holds_messages() {
        let network = MemoryNetwork::new();
        let (_alice, bob, bob_link) = connected_pair(&network).await;

        bob.update_config(ConfigUpdate {
            auto_mode: Some(false),
            ..Default::default()
        })
        .await;
        assert_eq!(bob.send(&sigil_message(), "alice").await.unwrap(), SendOutcome::Queued);
        assert_eq!(bob_link.sent_count(), 0);

        let status = bob.get_status().await;
        assert!(!status.config.auto_mode);
        assert_eq!(status.queue.unwrap().size, 1);
        assert_eq!(status.contacts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_beacons_open_sessions() {
        let network = MemoryNetwork::new();
        let mut meshes = Vec::new();
        for id in ["alice", "bob"] {
            let link = Arc::new(network.endpoint(TransportKind::Relay));
            let mesh = SacredMesh::with_transports(
                NodeConfig::for_node(id),
                vec![link as Arc<dyn Transport>],
            );
            mesh.initialize().await.unwrap();
            meshes.push(mesh);
        }
        let (alice, bob) = (&meshes[0], &meshes[1]);
        let mut inbox = alice.on_message();
        let mut bob_inbox = bob.on_message();

        for _ in 0..30 {
            if !bob.contacts().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(bob.peers().await.unwrap().len(), 1);

        let message = sigil_message();
        bob.send(&message, "alice").await.unwrap();
        let received = recv(&mut inbox).await;
        assert_eq!(received.from, "bob");
        assert_eq!(received.message, message);

        // Both sides opened a session from beacons; one of them wins
        alice.send(&message, "bob").await.unwrap();
        assert_eq!(recv(&mut bob_inbox).await.from, "alice");
        bob.send(&message, "alice").await.unwrap();
        assert_eq!(recv(&mut inbox).await.from, "bob");
        for (mesh, peer) in [(alice, "bob"), (bob, "alice")] {
            let contacts = mesh.contacts().await.unwrap();
            let contact = contacts.iter().find(|c| c.id == peer).unwrap();
            assert_eq!(contact.state, SessionState::Established);
        }

        for mesh in &meshes {
            mesh.disconnect().await;
        }
    }
}
