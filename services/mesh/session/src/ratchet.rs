//! Per-direction symmetric ratchet.
//!
//! The root key splits into an initiator chain and a responder chain, so the
//! two directions never share a chain key. Every step of a chain yields the
//! next chain key and one message key; message keys are used once and then
//! dropped (and zeroized). Receiving chains are keyed by session id, which
//! lets a contact hold the chains of two crossed handshakes at once.
//!
//! Sending chains of sessions the peer initiated but we are not using yet
//! are parked as standby chains until one side's session wins.

use crate::error::SessionError;
use mesh_crypto::{derive_key_pair, CryptoError, SymmetricKey};
use std::collections::{HashMap, VecDeque};

/// Bound on cached keys for skipped (out-of-order) messages
pub const MAX_SKIPPED_KEYS: usize = 256;

const CHAIN_SPLIT_INFO: &[u8] = b"SacredMesh-Chains";
const CHAIN_STEP_INFO: &[u8] = b"SacredMesh-ChainStep";

/// One direction of a session
#[derive(Debug, Clone)]
pub struct ChainState {
    chain_key: SymmetricKey,
    message_number: u32,
}

impl ChainState {
    fn new(chain_key: SymmetricKey) -> Self {
        Self {
            chain_key,
            message_number: 0,
        }
    }

    /// Number of the next message key this chain will produce
    pub fn message_number(&self) -> u32 {
        self.message_number
    }

    fn step(&mut self) -> Result<SymmetricKey, CryptoError> {
        let (next_chain, message_key) =
            derive_key_pair(self.chain_key.as_bytes(), None, CHAIN_STEP_INFO)?;
        self.chain_key = next_chain;
        self.message_number = self.message_number.wrapping_add(1);
        Ok(message_key)
    }
}

#[derive(Debug)]
struct SkippedKey {
    session_id: u32,
    message_number: u32,
    key: SymmetricKey,
}

/// Message key handed out for one outgoing message
#[derive(Debug)]
pub struct SendingKey {
    /// Session the key belongs to
    pub session_id: u32,
    /// Position in the sending chain
    pub message_number: u32,
    /// Single-use AEAD key
    pub key: SymmetricKey,
}

/// Forward-secrecy state of one contact
#[derive(Debug)]
pub struct RatchetState {
    root_key: SymmetricKey,
    sending_session: u32,
    sending: Option<ChainState>,
    receiving: HashMap<u32, ChainState>,
    standby: HashMap<u32, ChainState>,
    skipped: VecDeque<SkippedKey>,
}

fn split(root_key: &SymmetricKey) -> Result<(ChainState, ChainState), CryptoError> {
    let (initiator, responder) = derive_key_pair(root_key.as_bytes(), None, CHAIN_SPLIT_INFO)?;
    Ok((ChainState::new(initiator), ChainState::new(responder)))
}

impl RatchetState {
    /// State for the party that sent the handshake
    pub fn new_initiator(root_key: SymmetricKey, session_id: u32) -> Result<Self, SessionError> {
        let (initiator, responder) = split(&root_key)?;
        Ok(Self {
            root_key,
            sending_session: session_id,
            sending: Some(initiator),
            receiving: HashMap::from([(session_id, responder)]),
            standby: HashMap::new(),
            skipped: VecDeque::new(),
        })
    }

    /// State for the party that received the handshake
    pub fn new_responder(root_key: SymmetricKey, session_id: u32) -> Result<Self, SessionError> {
        let (initiator, responder) = split(&root_key)?;
        Ok(Self {
            root_key,
            sending_session: session_id,
            sending: Some(responder),
            receiving: HashMap::from([(session_id, initiator)]),
            standby: HashMap::new(),
            skipped: VecDeque::new(),
        })
    }

    /// Most recent root key
    pub fn root_key(&self) -> &SymmetricKey {
        &self.root_key
    }

    /// Session id used for outgoing messages
    pub fn sending_session(&self) -> u32 {
        self.sending_session
    }

    /// Whether a receiving chain exists for `session_id`
    pub fn has_receiving(&self, session_id: u32) -> bool {
        self.receiving.contains_key(&session_id)
    }

    /// Number of cached skipped-message keys
    pub fn skipped_len(&self) -> usize {
        self.skipped.len()
    }

    /// Whether a parked sending chain exists for `session_id`
    pub fn has_standby(&self, session_id: u32) -> bool {
        self.standby.contains_key(&session_id)
    }

    /// Take over the receiving side of a freshly accepted session.
    ///
    /// Our own sending chain is kept when one exists; the accepted session's
    /// sending chain is parked so [`RatchetState::switch_to`] can use it.
    pub fn adopt(&mut self, mut other: RatchetState) {
        self.receiving.extend(other.receiving.drain());
        for skipped in other.skipped.drain(..) {
            self.push_skipped(skipped);
        }
        match other.sending.take() {
            Some(chain) if self.sending.is_some() => {
                self.standby.insert(other.sending_session, chain);
            }
            Some(chain) => {
                self.sending = Some(chain);
                self.sending_session = other.sending_session;
                self.root_key = other.root_key.clone();
            }
            None => {}
        }
    }

    /// Send on the session we just initiated while keeping every receiving
    /// chain and skipped key, so in-flight messages from the peer still open.
    ///
    /// The previous sending chain is parked in case the peer's session wins.
    pub fn restart(&mut self, mut fresh: RatchetState) {
        if let Some(previous) = self.sending.take() {
            self.standby.insert(self.sending_session, previous);
        }
        self.receiving.extend(fresh.receiving.drain());
        self.sending = fresh.sending.take();
        self.sending_session = fresh.sending_session;
        self.root_key = fresh.root_key.clone();
    }

    /// Send on a parked chain instead of the current one.
    ///
    /// Returns false when no chain is parked for `session_id`.
    pub fn switch_to(&mut self, session_id: u32) -> bool {
        match self.standby.remove(&session_id) {
            Some(chain) => {
                self.sending = Some(chain);
                self.sending_session = session_id;
                true
            }
            None => false,
        }
    }

    /// Drop parked chains once a session is confirmed by the peer
    pub fn confirm(&mut self) {
        self.standby.clear();
    }

    /// Advance the sending chain by one message
    pub fn next_sending_key(&mut self) -> Result<SendingKey, SessionError> {
        let session_id = self.sending_session;
        let chain = self
            .sending
            .as_mut()
            .ok_or(SessionError::UnknownSession(session_id))?;
        let message_number = chain.message_number;
        let key = chain.step()?;
        Ok(SendingKey {
            session_id,
            message_number,
            key,
        })
    }

    /// Locate the key for `(session_id, message_number)` and run `open` with it.
    ///
    /// The chain and skipped-key cache are only updated when `open` succeeds,
    /// so a forged packet cannot advance or exhaust the state.
    pub fn decrypt_with<F>(
        &mut self,
        session_id: u32,
        message_number: u32,
        open: F,
    ) -> Result<Vec<u8>, SessionError>
    where
        F: FnOnce(&SymmetricKey) -> Result<Vec<u8>, CryptoError>,
    {
        if let Some(pos) = self
            .skipped
            .iter()
            .position(|s| s.session_id == session_id && s.message_number == message_number)
        {
            let plaintext = open(&self.skipped[pos].key).map_err(|_| SessionError::Decryption)?;
            self.skipped.remove(pos);
            return Ok(plaintext);
        }

        let chain = self
            .receiving
            .get(&session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;

        // Already consumed and not cached
        if message_number < chain.message_number {
            return Err(SessionError::Decryption);
        }
        let gap = message_number - chain.message_number;
        if gap as usize > MAX_SKIPPED_KEYS {
            return Err(SessionError::TooManySkipped(gap));
        }

        let mut working = chain.clone();
        let mut skipped = Vec::with_capacity(gap as usize);
        while working.message_number < message_number {
            let number = working.message_number;
            let key = working.step()?;
            skipped.push(SkippedKey {
                session_id,
                message_number: number,
                key,
            });
        }
        let message_key = working.step()?;
        let plaintext = open(&message_key).map_err(|_| SessionError::Decryption)?;

        self.receiving.insert(session_id, working);
        for key in skipped {
            self.push_skipped(key);
        }
        Ok(plaintext)
    }

    fn push_skipped(&mut self, key: SkippedKey) {
        if self.skipped.len() >= MAX_SKIPPED_KEYS {
            self.skipped.pop_front();
        }
        self.skipped.push_back(key);
    }
}
