//! Contacts and their session state.

use crate::bundle::KeyBundle;
use crate::handshake::HandshakeInfo;
use crate::ratchet::RatchetState;
use mesh_crypto::{create_fingerprint, IdentityPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session lifecycle of a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session material
    Uninitialized,
    /// We initiated and have not heard back on our session yet
    Handshaking,
    /// Both directions confirmed
    Established,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Handshaking => write!(f, "handshaking"),
            SessionState::Established => write!(f, "established"),
        }
    }
}

/// How the contact's identity key became known
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrustLevel {
    /// Learned from an inbound handshake or a discovery beacon
    Unverified,
    /// Added explicitly from a signature-verified key bundle
    Verified,
}

/// A remote identity known to this node
#[derive(Debug)]
pub struct Contact {
    /// Application-level id
    pub id: String,
    /// Remote identity key
    pub identity_key: IdentityPublicKey,
    /// Bundle the session was initiated from, if we initiated
    pub key_bundle: Option<KeyBundle>,
    /// Fingerprint of `identity_key`
    pub fingerprint: String,
    /// Trust in the identity binding
    pub trust: TrustLevel,
    /// Session lifecycle
    pub state: SessionState,
    pub(crate) ratchet: Option<RatchetState>,
    pub(crate) pending_handshake: Option<HandshakeInfo>,
}

impl Contact {
    pub(crate) fn new(id: String, identity_key: IdentityPublicKey, trust: TrustLevel) -> Self {
        Self {
            fingerprint: create_fingerprint(&identity_key),
            id,
            identity_key,
            key_bundle: None,
            trust,
            state: SessionState::Uninitialized,
            ratchet: None,
            pending_handshake: None,
        }
    }

    /// Read-only snapshot
    pub fn info(&self) -> ContactInfo {
        ContactInfo {
            id: self.id.clone(),
            identity_key: self.identity_key,
            fingerprint: self.fingerprint.clone(),
            trust: self.trust,
            state: self.state,
        }
    }
}

/// Snapshot of a contact without secret state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    /// Application-level id
    pub id: String,
    /// Remote identity key
    pub identity_key: IdentityPublicKey,
    /// Human-comparable fingerprint
    pub fingerprint: String,
    /// Trust in the identity binding
    pub trust: TrustLevel,
    /// Session lifecycle
    pub state: SessionState,
}
