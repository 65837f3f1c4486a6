//! Published key bundles and the QR exchange payload.

use crate::error::SessionError;
use mesh_crypto::{verify, AgreementPublicKey, IdentityPublicKey, KEY_SIZE, SIGNATURE_SIZE};
use serde::{Deserialize, Serialize};

/// Single-use prekey offered in a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneTimePreKey {
    /// Id the initiator echoes back in its handshake
    pub id: u32,
    /// Public agreement key
    pub key: AgreementPublicKey,
}

/// Material a party publishes so others can start a session with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBundle {
    /// Long-lived identity key
    pub identity_key: IdentityPublicKey,
    /// Medium-lived signed prekey
    pub signed_pre_key: AgreementPublicKey,
    /// Identity signature over the exported signed prekey
    pub signature: Vec<u8>,
    /// One-time prekeys, consumed one per handshake
    pub one_time_keys: Vec<OneTimePreKey>,
}

impl KeyBundle {
    /// Whether the signed prekey was endorsed by the identity key
    pub fn verify_signature(&self) -> bool {
        verify(
            self.signed_pre_key.as_bytes(),
            &self.signature,
            &self.identity_key,
        )
    }

    /// Exchange payload for this bundle (one-time prekeys are not included)
    pub fn to_payload(&self, timestamp: u64) -> KeyBundlePayload {
        KeyBundlePayload {
            identity: self.identity_key.as_bytes().to_vec(),
            pre_key: self.signed_pre_key.as_bytes().to_vec(),
            signature: self.signature.clone(),
            timestamp,
        }
    }
}

/// Key-bundle exchange payload, e.g. for QR-code transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyBundlePayload {
    /// Exported identity key
    pub identity: Vec<u8>,
    /// Exported signed prekey
    pub pre_key: Vec<u8>,
    /// Signature over `pre_key`
    pub signature: Vec<u8>,
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl KeyBundlePayload {
    /// Encode as JSON
    pub fn to_json(&self) -> Result<String, SessionError> {
        serde_json::to_string(self).map_err(|e| SessionError::InvalidPayload(e.to_string()))
    }

    /// Decode from JSON
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        serde_json::from_str(json).map_err(|e| SessionError::InvalidPayload(e.to_string()))
    }

    /// Rebuild a bundle. Only lengths are checked here; the signature is
    /// verified when the bundle is used.
    pub fn to_bundle(&self) -> Result<KeyBundle, SessionError> {
        let identity: [u8; KEY_SIZE] = self
            .identity
            .as_slice()
            .try_into()
            .map_err(|_| SessionError::InvalidPayload("identity key length".into()))?;
        let pre_key: [u8; KEY_SIZE] = self
            .pre_key
            .as_slice()
            .try_into()
            .map_err(|_| SessionError::InvalidPayload("prekey length".into()))?;
        if self.signature.len() != SIGNATURE_SIZE {
            return Err(SessionError::InvalidPayload("signature length".into()));
        }

        Ok(KeyBundle {
            identity_key: IdentityPublicKey::from_bytes(identity),
            signed_pre_key: AgreementPublicKey::from_bytes(pre_key),
            signature: self.signature.clone(),
            one_time_keys: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_crypto::{sign, EphemeralKeyPair, IdentityKeyPair};

    fn bundle() -> KeyBundle {
        let identity = IdentityKeyPair::generate().unwrap();
        let prekey = EphemeralKeyPair::generate().unwrap();
        KeyBundle {
            identity_key: identity.public_key(),
            signed_pre_key: prekey.public_key(),
            signature: sign(prekey.public_key().as_bytes(), &identity).to_vec(),
            one_time_keys: Vec::new(),
        }
    }

    #[test]
    fn test_signature_tamper_detected() {
        let good = bundle();
        assert!(good.verify_signature());

        let mut bad_key = good.clone();
        let mut bytes = *bad_key.signed_pre_key.as_bytes();
        bytes[0] ^= 0x01;
        bad_key.signed_pre_key = AgreementPublicKey::from_bytes(bytes);
        assert!(!bad_key.verify_signature());

        let mut bad_sig = good.clone();
        bad_sig.signature[10] ^= 0x01;
        assert!(!bad_sig.verify_signature());
    }

    #[test]
    fn test_payload_json() {
        let original = bundle();
        let payload = original.to_payload(1_700_000_000_000);
        let json = payload.to_json().unwrap();
        assert!(json.contains("\"preKey\""));
        assert!(json.contains("\"identity\""));

        let parsed = KeyBundlePayload::from_json(&json).unwrap();
        assert_eq!(parsed, payload);
        let rebuilt = parsed.to_bundle().unwrap();
        assert_eq!(rebuilt.identity_key, original.identity_key);
        assert_eq!(rebuilt.signed_pre_key, original.signed_pre_key);
        assert!(rebuilt.verify_signature());
    }

    #[test]
    fn test_payload_length_checks() {
        let mut payload = bundle().to_payload(0);
        payload.identity.pop();
        assert!(matches!(
            payload.to_bundle(),
            Err(SessionError::InvalidPayload(_))
        ));

        assert!(KeyBundlePayload::from_json("{\"identity\": 3}").is_err());
    }
}
