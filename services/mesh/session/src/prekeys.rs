//! Local prekey material.

use crate::bundle::{KeyBundle, OneTimePreKey};
use crate::error::SessionError;
use mesh_crypto::{sign, EphemeralKeyPair, IdentityKeyPair, SIGNATURE_SIZE};
use std::collections::BTreeMap;
use tracing::debug;

/// One-time prekeys generated per published bundle
pub const ONE_TIME_KEYS_PER_BUNDLE: usize = 10;

/// Upper bound on unconsumed one-time prekeys kept locally
pub const MAX_ONE_TIME_KEYS: usize = 100;

/// Signed prekey (current and previous) plus the one-time prekey pool
#[derive(Debug)]
pub struct PreKeyStore {
    signed: EphemeralKeyPair,
    signature: [u8; SIGNATURE_SIZE],
    previous: Option<EphemeralKeyPair>,
    one_time: BTreeMap<u32, EphemeralKeyPair>,
    next_id: u32,
}

impl PreKeyStore {
    /// Wrap an existing signed prekey
    pub fn new(identity: &IdentityKeyPair, signed: EphemeralKeyPair) -> Self {
        let signature = sign(signed.public_key().as_bytes(), identity);
        Self {
            signed,
            signature,
            previous: None,
            one_time: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Current signed prekey
    pub fn signed(&self) -> &EphemeralKeyPair {
        &self.signed
    }

    /// Current then previous signed prekey, in the order a responder tries them
    pub fn signed_candidates(&self) -> impl Iterator<Item = &EphemeralKeyPair> {
        std::iter::once(&self.signed).chain(self.previous.as_ref())
    }

    /// Replace the signed prekey, keeping the old one for late handshakes
    pub fn rotate(&mut self, identity: &IdentityKeyPair, signed: EphemeralKeyPair) {
        self.signature = sign(signed.public_key().as_bytes(), identity);
        self.previous = Some(std::mem::replace(&mut self.signed, signed));
        debug!("Rotated signed prekey");
    }

    /// Bundle with a fresh batch of one-time prekeys
    pub fn bundle(&mut self, identity: &IdentityKeyPair) -> Result<KeyBundle, SessionError> {
        let mut one_time_keys = Vec::with_capacity(ONE_TIME_KEYS_PER_BUNDLE);
        for _ in 0..ONE_TIME_KEYS_PER_BUNDLE {
            let pair = EphemeralKeyPair::generate()?;
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1).max(1);
            one_time_keys.push(OneTimePreKey {
                id,
                key: pair.public_key(),
            });
            self.one_time.insert(id, pair);
        }

        // Drop the oldest unconsumed keys past the bound
        while self.one_time.len() > MAX_ONE_TIME_KEYS {
            self.one_time.pop_first();
        }

        Ok(self.bundle_without_one_time_keys(identity, one_time_keys))
    }

    /// Bundle without one-time prekeys (exchange payloads, beacons)
    pub fn bundle_without_one_time_keys(
        &self,
        identity: &IdentityKeyPair,
        one_time_keys: Vec<OneTimePreKey>,
    ) -> KeyBundle {
        KeyBundle {
            identity_key: identity.public_key(),
            signed_pre_key: self.signed.public_key(),
            signature: self.signature.to_vec(),
            one_time_keys,
        }
    }

    /// Look up a one-time prekey without consuming it
    pub fn one_time(&self, id: u32) -> Option<&EphemeralKeyPair> {
        self.one_time.get(&id)
    }

    /// Remove a one-time prekey after a handshake used it
    pub fn consume_one_time(&mut self, id: u32) -> bool {
        self.one_time.remove(&id).is_some()
    }

    /// Number of unconsumed one-time prekeys
    pub fn one_time_len(&self) -> usize {
        self.one_time.len()
    }
}
