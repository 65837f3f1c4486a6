//! Session manager: contacts, handshakes and per-message encryption.
//!
//! Every contact lives behind its own mutex so that a chain key is advanced
//! exactly once per message even when sends and receives race. The contact
//! map itself is a `DashMap`; guards from it are never held across an await.

use crate::bundle::{KeyBundle, KeyBundlePayload};
use crate::contact::{Contact, ContactInfo, SessionState, TrustLevel};
use crate::error::SessionError;
use crate::handshake::{self, HandshakeInfo};
use crate::prekeys::PreKeyStore;
use crate::ratchet::RatchetState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mesh_crypto::{
    create_fingerprint, decrypt_with_aad, encrypt_with_aad, generate_nonce, hash_sender_id,
    EphemeralKeyPair, IdentityKeyPair, IdentityPublicKey, SenderIdHash, KEY_SIZE, NONCE_SIZE,
    TAG_SIZE,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Longest node id that fits the handshake envelope
pub const MAX_NODE_ID_LEN: usize = u8::MAX as usize;

/// What a receiver needs to locate the message key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    /// Initiation material, present while the sender is handshaking
    pub handshake: Option<HandshakeInfo>,
    /// Session the message key belongs to
    pub session_id: u32,
    /// Position of the message key in its chain
    pub message_number: u32,
    /// AEAD nonce
    pub nonce: [u8; NONCE_SIZE],
}

/// Output of [`SessionManager::encrypt_message`]
#[derive(Debug, Clone)]
pub struct EncryptedMessage {
    /// Key-location info for the receiver
    pub header_info: HeaderInfo,
    /// Ciphertext without nonce or tag
    pub ciphertext: Vec<u8>,
    /// Detached authentication tag
    pub auth_tag: [u8; TAG_SIZE],
}

/// Output of [`SessionManager::accept_handshake`]
#[derive(Debug, Clone)]
pub struct AcceptedHandshake {
    /// Contact the handshake came from
    pub contact_id: String,
    /// Decrypted payload
    pub plaintext: Vec<u8>,
    /// Whether this handshake created the contact's first session
    pub new_session: bool,
}

/// Owns the identity, prekeys and every contact's ratchet
#[derive(Debug)]
pub struct SessionManager {
    node_id: String,
    identity: IdentityKeyPair,
    prekeys: Mutex<PreKeyStore>,
    contacts: DashMap<String, Arc<Mutex<Contact>>>,
    senders: DashMap<SenderIdHash, String>,
}

impl SessionManager {
    /// Create a manager for `node_id` with existing identity and signed prekey
    pub fn new(
        node_id: impl Into<String>,
        identity: IdentityKeyPair,
        signed_pre_key: EphemeralKeyPair,
    ) -> Result<Self, SessionError> {
        let node_id = node_id.into();
        if node_id.is_empty() || node_id.len() > MAX_NODE_ID_LEN {
            return Err(SessionError::InvalidNodeId(node_id));
        }

        let prekeys = PreKeyStore::new(&identity, signed_pre_key);
        Ok(Self {
            node_id,
            identity,
            prekeys: Mutex::new(prekeys),
            contacts: DashMap::new(),
            senders: DashMap::new(),
        })
    }

    /// Create a manager with freshly generated keys
    pub fn generate(node_id: impl Into<String>) -> Result<Self, SessionError> {
        Self::new(
            node_id,
            IdentityKeyPair::generate()?,
            EphemeralKeyPair::generate()?,
        )
    }

    /// Local node id
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Local identity public key
    pub fn identity_public_key(&self) -> IdentityPublicKey {
        self.identity.public_key()
    }

    /// Local identity fingerprint
    pub fn fingerprint(&self) -> String {
        create_fingerprint(&self.identity.public_key())
    }

    /// Secret of the current signed prekey (for persistence)
    pub async fn signed_pre_key_secret(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        self.prekeys.lock().await.signed().secret_bytes()
    }

    /// Publishable bundle with a fresh batch of one-time prekeys
    pub async fn generate_key_bundle(&self) -> Result<KeyBundle, SessionError> {
        let bundle = self.prekeys.lock().await.bundle(&self.identity)?;
        debug!(
            "Generated key bundle with {} one-time prekeys",
            bundle.one_time_keys.len()
        );
        Ok(bundle)
    }

    /// Exchange payload for the current signed prekey
    pub async fn key_bundle_payload(&self, timestamp: u64) -> KeyBundlePayload {
        self.prekeys
            .lock()
            .await
            .bundle_without_one_time_keys(&self.identity, Vec::new())
            .to_payload(timestamp)
    }

    /// Generate a new signed prekey; the previous one stays valid for late handshakes
    pub async fn rotate_signed_pre_key(&self) -> Result<(), SessionError> {
        let fresh = EphemeralKeyPair::generate()?;
        self.prekeys.lock().await.rotate(&self.identity, fresh);
        Ok(())
    }

    /// Verify a bundle and start a session with it (trusted, explicit add)
    pub async fn add_contact(
        &self,
        contact_id: &str,
        bundle: KeyBundle,
    ) -> Result<ContactInfo, SessionError> {
        self.add_contact_with_trust(contact_id, bundle, TrustLevel::Verified)
            .await
    }

    /// Add a contact only if none exists under `contact_id`.
    ///
    /// Returns `None` when the contact was already known, so discovery never
    /// replaces or upgrades an existing session.
    pub async fn add_contact_if_absent(
        &self,
        contact_id: &str,
        bundle: KeyBundle,
    ) -> Result<Option<ContactInfo>, SessionError> {
        self.insert_contact(contact_id, bundle, TrustLevel::Unverified, true)
            .await
    }

    /// Verify a bundle and start a session with the given trust level.
    ///
    /// Re-adding a known contact with the same identity key starts a fresh
    /// sending session and keeps the receiving side. A different identity
    /// key replaces an unverified contact only on a verified add, and is
    /// rejected otherwise.
    pub async fn add_contact_with_trust(
        &self,
        contact_id: &str,
        bundle: KeyBundle,
        trust: TrustLevel,
    ) -> Result<ContactInfo, SessionError> {
        self.insert_contact(contact_id, bundle, trust, false)
            .await?
            .ok_or_else(|| SessionError::UnknownContact(contact_id.to_string()))
    }

    async fn insert_contact(
        &self,
        contact_id: &str,
        bundle: KeyBundle,
        trust: TrustLevel,
        only_if_absent: bool,
    ) -> Result<Option<ContactInfo>, SessionError> {
        let ephemeral = EphemeralKeyPair::generate()?;
        let initiation = handshake::initiate(&self.identity, &bundle, &ephemeral)?;
        let ratchet = RatchetState::new_initiator(initiation.root_key, initiation.session_id)?;

        let entry = match self.contacts.entry(contact_id.to_string()) {
            Entry::Occupied(_) if only_if_absent => return Ok(None),
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => vacant
                .insert(Arc::new(Mutex::new(Contact::new(
                    contact_id.to_string(),
                    bundle.identity_key,
                    trust,
                ))))
                .value()
                .clone(),
        };

        let mut contact = entry.lock().await;
        if contact.identity_key != bundle.identity_key {
            if contact.trust >= TrustLevel::Verified || trust < TrustLevel::Verified {
                warn!(
                    "Rejected key bundle for {}: identity key differs from known contact",
                    contact_id
                );
                return Err(SessionError::IdentityMismatch(contact_id.to_string()));
            }
            warn!(
                "Replacing unverified contact {} ({}) with verified identity",
                contact_id, contact.fingerprint
            );
            *contact = Contact::new(contact_id.to_string(), bundle.identity_key, trust);
        }

        contact.trust = contact.trust.max(trust);
        contact.key_bundle = Some(bundle);
        match contact.ratchet.as_mut() {
            Some(existing) => existing.restart(ratchet),
            None => contact.ratchet = Some(ratchet),
        }
        contact.pending_handshake = Some(initiation.info);
        contact.state = SessionState::Handshaking;
        self.senders
            .insert(hash_sender_id(contact_id), contact_id.to_string());

        info!(
            "Added contact {} ({}), session {:08x}",
            contact_id, contact.fingerprint, initiation.session_id
        );
        Ok(Some(contact.info()))
    }

    /// Encrypt with no associated data
    pub async fn encrypt_message(
        &self,
        contact_id: &str,
        plaintext: &[u8],
    ) -> Result<EncryptedMessage, SessionError> {
        self.encrypt_message_with_aad(contact_id, plaintext, |_| Vec::new())
            .await
    }

    /// Advance the sending chain and encrypt one message.
    ///
    /// `aad` is called with `true` when the message will carry handshake
    /// material, so the caller can build a header of the right type and bind
    /// it as associated data.
    pub async fn encrypt_message_with_aad<F>(
        &self,
        contact_id: &str,
        plaintext: &[u8],
        aad: F,
    ) -> Result<EncryptedMessage, SessionError>
    where
        F: FnOnce(bool) -> Vec<u8>,
    {
        let contact = self
            .contact_entry(contact_id)
            .ok_or_else(|| SessionError::UnknownContact(contact_id.to_string()))?;
        let mut contact = contact.lock().await;

        let handshake = contact.pending_handshake;
        let ratchet = contact
            .ratchet
            .as_mut()
            .ok_or_else(|| SessionError::NoSession(contact_id.to_string()))?;
        let sending = ratchet.next_sending_key()?;

        let body = match handshake {
            Some(_) => self.frame_handshake_plaintext(plaintext),
            None => plaintext.to_vec(),
        };

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&generate_nonce(NONCE_SIZE)?);
        let aad = aad(handshake.is_some());
        let sealed = encrypt_with_aad(&body, &sending.key, &nonce, &aad)?;

        debug!(
            "Encrypted message {} on session {:08x} for {}",
            sending.message_number, sending.session_id, contact_id
        );
        Ok(EncryptedMessage {
            header_info: HeaderInfo {
                handshake,
                session_id: sending.session_id,
                message_number: sending.message_number,
                nonce,
            },
            ciphertext: sealed.ciphertext,
            auth_tag: sealed.auth_tag,
        })
    }

    /// Decrypt with no associated data
    pub async fn decrypt_message(
        &self,
        contact_id: &str,
        ciphertext: &[u8],
        auth_tag: &[u8],
        header_info: &HeaderInfo,
    ) -> Result<Vec<u8>, SessionError> {
        self.decrypt_message_with_aad(contact_id, ciphertext, auth_tag, header_info, &[])
            .await
    }

    /// Decrypt a message on one of the contact's existing receiving chains
    pub async fn decrypt_message_with_aad(
        &self,
        contact_id: &str,
        ciphertext: &[u8],
        auth_tag: &[u8],
        header_info: &HeaderInfo,
        aad: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        let contact = self
            .contact_entry(contact_id)
            .ok_or_else(|| SessionError::UnknownContact(contact_id.to_string()))?;
        let mut contact = contact.lock().await;

        let ratchet = contact
            .ratchet
            .as_mut()
            .ok_or_else(|| SessionError::NoSession(contact_id.to_string()))?;
        let plaintext = ratchet.decrypt_with(
            header_info.session_id,
            header_info.message_number,
            |key| decrypt_with_aad(ciphertext, auth_tag, key, &header_info.nonce, aad),
        )?;

        let payload = match header_info.handshake {
            Some(_) => {
                let (sender_id, payload) = unframe_handshake_plaintext(&plaintext)?;
                if sender_id != contact_id {
                    return Err(SessionError::SenderMismatch);
                }
                payload
            }
            None => plaintext,
        };
        settle_session(
            &mut contact,
            header_info.session_id,
            header_info.handshake.is_some(),
        );
        Ok(payload)
    }

    /// Accept a handshake packet from a possibly unknown sender.
    ///
    /// Packets on a session we already hold are decrypted normally. Otherwise
    /// the root key is rederived from our signed prekey (current, then
    /// previous) and the referenced one-time prekey. Nothing is committed,
    /// and no one-time prekey consumed, unless the packet authenticates and
    /// its embedded sender id hashes to `sender_hash`.
    pub async fn accept_handshake(
        &self,
        sender_hash: SenderIdHash,
        ciphertext: &[u8],
        auth_tag: &[u8],
        header_info: &HeaderInfo,
        aad: &[u8],
    ) -> Result<AcceptedHandshake, SessionError> {
        let info = header_info.handshake.ok_or(SessionError::Decryption)?;
        let session_id = info.session_id();
        if session_id != header_info.session_id {
            return Err(SessionError::Decryption);
        }

        if let Some(contact_id) = self.contact_for_sender(&sender_hash) {
            if self.has_receiving_session(&contact_id, session_id).await {
                let plaintext = self
                    .decrypt_message_with_aad(&contact_id, ciphertext, auth_tag, header_info, aad)
                    .await?;
                return Ok(AcceptedHandshake {
                    contact_id,
                    plaintext,
                    new_session: false,
                });
            }
        }

        let mut prekeys = self.prekeys.lock().await;
        let one_time = match info.one_time_key_id {
            Some(id) => Some(
                prekeys
                    .one_time(id)
                    .cloned()
                    .ok_or(SessionError::Decryption)?,
            ),
            None => None,
        };

        let mut accepted = None;
        for signed in prekeys.signed_candidates() {
            let root = handshake::respond(&self.identity, signed, one_time.as_ref(), &info)?;
            let mut ratchet = RatchetState::new_responder(root, session_id)?;
            match ratchet.decrypt_with(session_id, header_info.message_number, |key| {
                decrypt_with_aad(ciphertext, auth_tag, key, &header_info.nonce, aad)
            }) {
                Ok(plaintext) => {
                    accepted = Some((ratchet, plaintext));
                    break;
                }
                Err(SessionError::Decryption) => continue,
                Err(e) => return Err(e),
            }
        }
        let (ratchet, framed) = accepted.ok_or(SessionError::Decryption)?;
        let (sender_id, payload) = unframe_handshake_plaintext(&framed)?;
        if hash_sender_id(&sender_id) != sender_hash {
            warn!("Handshake sender {} does not match header hash", sender_id);
            return Err(SessionError::SenderMismatch);
        }

        let entry = self
            .contacts
            .entry(sender_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Contact::new(
                    sender_id.clone(),
                    info.identity_key,
                    TrustLevel::Unverified,
                )))
            })
            .value()
            .clone();
        let mut contact = entry.lock().await;
        if contact.identity_key != info.identity_key {
            warn!(
                "Rejected handshake from {}: identity key differs from known contact",
                sender_id
            );
            return Err(SessionError::IdentityMismatch(sender_id));
        }

        if let Some(id) = info.one_time_key_id {
            prekeys.consume_one_time(id);
        }
        drop(prekeys);

        let new_session = match contact.ratchet.as_mut() {
            Some(existing) => {
                existing.adopt(ratchet);
                false
            }
            None => {
                contact.ratchet = Some(ratchet);
                contact.state = SessionState::Established;
                true
            }
        };
        if !new_session {
            settle_session(&mut contact, session_id, true);
        }
        self.senders.insert(sender_hash, sender_id.clone());

        info!(
            "Accepted handshake from {} ({}), session {:08x}",
            sender_id, contact.fingerprint, session_id
        );
        Ok(AcceptedHandshake {
            contact_id: sender_id,
            plaintext: payload,
            new_session,
        })
    }

    /// Contact id whose sender hash matches
    pub fn contact_for_sender(&self, sender_hash: &SenderIdHash) -> Option<String> {
        self.senders.get(sender_hash).map(|id| id.value().clone())
    }

    /// Whether a contact exists
    pub fn has_contact(&self, contact_id: &str) -> bool {
        self.contacts.contains_key(contact_id)
    }

    /// Snapshot of one contact
    pub async fn contact(&self, contact_id: &str) -> Option<ContactInfo> {
        let contact = self.contact_entry(contact_id)?;
        let info = contact.lock().await.info();
        Some(info)
    }

    /// Snapshots of all contacts, ordered by id
    pub async fn contacts(&self) -> Vec<ContactInfo> {
        let entries: Vec<_> = self.contacts.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(entries.len());
        for entry in entries {
            infos.push(entry.lock().await.info());
        }
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Session state of a contact; unknown contacts are uninitialized
    pub async fn session_state(&self, contact_id: &str) -> SessionState {
        match self.contact_entry(contact_id) {
            Some(contact) => contact.lock().await.state,
            None => SessionState::Uninitialized,
        }
    }

    /// Explicitly forget a contact and its session
    pub fn remove_contact(&self, contact_id: &str) -> bool {
        let removed = self.contacts.remove(contact_id).is_some();
        if removed {
            self.senders.remove(&hash_sender_id(contact_id));
            info!("Removed contact {}", contact_id);
        }
        removed
    }

    fn contact_entry(&self, contact_id: &str) -> Option<Arc<Mutex<Contact>>> {
        self.contacts.get(contact_id).map(|e| e.value().clone())
    }

    async fn has_receiving_session(&self, contact_id: &str, session_id: u32) -> bool {
        match self.contact_entry(contact_id) {
            Some(contact) => contact
                .lock()
                .await
                .ratchet
                .as_ref()
                .map(|r| r.has_receiving(session_id))
                .unwrap_or(false),
            None => false,
        }
    }

    fn frame_handshake_plaintext(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(1 + self.node_id.len() + plaintext.len());
        framed.push(self.node_id.len() as u8);
        framed.extend_from_slice(self.node_id.as_bytes());
        framed.extend_from_slice(plaintext);
        framed
    }
}

/// Update a contact's session state after a message on `session_id` opened.
///
/// A message on our own sending session confirms it. A handshake on another
/// session means the peer started one too: while both are pending the lower
/// session id wins, otherwise the peer's newer session replaces ours.
fn settle_session(contact: &mut Contact, session_id: u32, peer_initiated: bool) {
    let pending = contact.pending_handshake.is_some();
    let Some(ratchet) = contact.ratchet.as_mut() else {
        return;
    };
    let sending_session = ratchet.sending_session();

    if session_id == sending_session {
        if contact.state == SessionState::Handshaking {
            ratchet.confirm();
            contact.state = SessionState::Established;
            contact.pending_handshake = None;
            info!(
                "Session {:08x} with {} established",
                sending_session, contact.id
            );
        }
        return;
    }

    if !peer_initiated || (pending && session_id > sending_session) {
        return;
    }
    if ratchet.switch_to(session_id) {
        ratchet.confirm();
        contact.state = SessionState::Established;
        contact.pending_handshake = None;
        info!(
            "Switched {} from session {:08x} to {:08x}",
            contact.id, sending_session, session_id
        );
    }
}

fn unframe_handshake_plaintext(framed: &[u8]) -> Result<(String, Vec<u8>), SessionError> {
    let (&len, rest) = framed.split_first().ok_or(SessionError::Decryption)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(SessionError::Decryption);
    }
    let sender = std::str::from_utf8(&rest[..len]).map_err(|_| SessionError::Decryption)?;
    Ok((sender.to_string(), rest[len..].to_vec()))
}
