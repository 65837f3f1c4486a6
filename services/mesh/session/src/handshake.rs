//! X3DH-style session initiation.
//!
//! The initiator combines four agreements against the recipient's bundle:
//!
//! ```text
//! DH1 = DH(IK_initiator, SPK_recipient)
//! DH2 = DH(EK_initiator, IK_recipient)
//! DH3 = DH(EK_initiator, SPK_recipient)
//! DH4 = DH(EK_initiator, OPK_recipient)   (when a one-time prekey is offered)
//! ```
//!
//! and runs the concatenation through HKDF into a root key. The recipient
//! recomputes the same values from the handshake section of the first packet.

use crate::bundle::KeyBundle;
use crate::error::SessionError;
use mesh_crypto::{
    derive_key, derive_shared_secret, AgreementPublicKey, EphemeralKeyPair, IdentityKeyPair,
    IdentityPublicKey, SymmetricKey,
};
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::Zeroizing;

const ROOT_KEY_INFO: &[u8] = b"SacredMesh-RootKey";

/// Initiation material carried by HANDSHAKE packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// Initiator's identity key
    pub identity_key: IdentityPublicKey,
    /// Initiator's ephemeral agreement key
    pub ephemeral_key: AgreementPublicKey,
    /// One-time prekey the initiator used
    pub one_time_key_id: Option<u32>,
}

impl HandshakeInfo {
    /// Session id both sides derive from the ephemeral key
    pub fn session_id(&self) -> u32 {
        session_id_for(&self.ephemeral_key)
    }
}

/// Result of initiating against a bundle
#[derive(Debug)]
pub struct Initiation {
    /// Shared root key
    pub root_key: SymmetricKey,
    /// Session id for the new chains
    pub session_id: u32,
    /// What to send to the recipient
    pub info: HandshakeInfo,
}

/// First four bytes of SHA-256 over the ephemeral key
pub fn session_id_for(ephemeral_key: &AgreementPublicKey) -> u32 {
    let digest = Sha256::digest(ephemeral_key.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Verify the bundle and derive a root key as the initiator
pub fn initiate(
    identity: &IdentityKeyPair,
    bundle: &KeyBundle,
    ephemeral: &EphemeralKeyPair,
) -> Result<Initiation, SessionError> {
    if !bundle.verify_signature() {
        return Err(SessionError::InvalidKeyBundle(
            "signed prekey signature does not verify".into(),
        ));
    }
    let their_identity = bundle
        .identity_key
        .agreement_key()
        .map_err(|_| SessionError::InvalidKeyBundle("identity key is not a curve point".into()))?;

    let one_time = bundle.one_time_keys.first();

    let mut secrets = vec![
        derive_shared_secret(&identity.agreement_secret(), &bundle.signed_pre_key)?,
        derive_shared_secret(ephemeral.secret(), &their_identity)?,
        derive_shared_secret(ephemeral.secret(), &bundle.signed_pre_key)?,
    ];
    if let Some(otk) = one_time {
        secrets.push(derive_shared_secret(ephemeral.secret(), &otk.key)?);
    }

    let info = HandshakeInfo {
        identity_key: identity.public_key(),
        ephemeral_key: ephemeral.public_key(),
        one_time_key_id: one_time.map(|otk| otk.id),
    };
    debug!(
        "Initiated handshake with {} agreements (session {:08x})",
        secrets.len(),
        info.session_id()
    );

    Ok(Initiation {
        root_key: combine(&secrets)?,
        session_id: info.session_id(),
        info,
    })
}

/// Derive the root key as the recipient of a handshake
pub fn respond(
    identity: &IdentityKeyPair,
    signed_pre_key: &EphemeralKeyPair,
    one_time_key: Option<&EphemeralKeyPair>,
    info: &HandshakeInfo,
) -> Result<SymmetricKey, SessionError> {
    let their_identity = info.identity_key.agreement_key()?;

    let mut secrets = vec![
        derive_shared_secret(signed_pre_key.secret(), &their_identity)?,
        derive_shared_secret(&identity.agreement_secret(), &info.ephemeral_key)?,
        derive_shared_secret(signed_pre_key.secret(), &info.ephemeral_key)?,
    ];
    if let Some(otk) = one_time_key {
        secrets.push(derive_shared_secret(otk.secret(), &info.ephemeral_key)?);
    }

    combine(&secrets)
}

fn combine(secrets: &[SymmetricKey]) -> Result<SymmetricKey, SessionError> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(secrets.len() * 32));
    for secret in secrets {
        ikm.extend_from_slice(secret.as_bytes());
    }
    Ok(derive_key(&ikm, None, ROOT_KEY_INFO)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::OneTimePreKey;
    use mesh_crypto::sign;

    struct Recipient {
        identity: IdentityKeyPair,
        spk: EphemeralKeyPair,
        otk: EphemeralKeyPair,
    }

    impl Recipient {
        fn new() -> Self {
            Self {
                identity: IdentityKeyPair::generate().unwrap(),
                spk: EphemeralKeyPair::generate().unwrap(),
                otk: EphemeralKeyPair::generate().unwrap(),
            }
        }

        fn bundle(&self, with_otk: bool) -> KeyBundle {
            KeyBundle {
                identity_key: self.identity.public_key(),
                signed_pre_key: self.spk.public_key(),
                signature: sign(self.spk.public_key().as_bytes(), &self.identity).to_vec(),
                one_time_keys: if with_otk {
                    vec![OneTimePreKey {
                        id: 42,
                        key: self.otk.public_key(),
                    }]
                } else {
                    Vec::new()
                },
            }
        }
    }

    #[test]
    fn test_both_sides_agree() {
        let recipient = Recipient::new();
        let initiator = IdentityKeyPair::generate().unwrap();
        let ephemeral = EphemeralKeyPair::generate().unwrap();

        let init = initiate(&initiator, &recipient.bundle(true), &ephemeral).unwrap();
        assert_eq!(init.info.one_time_key_id, Some(42));
        assert_eq!(init.session_id, session_id_for(&ephemeral.public_key()));

        let root = respond(
            &recipient.identity,
            &recipient.spk,
            Some(&recipient.otk),
            &init.info,
        )
        .unwrap();
        assert_eq!(root, init.root_key);
    }

    #[test]
    fn test_without_one_time_key() {
        let recipient = Recipient::new();
        let initiator = IdentityKeyPair::generate().unwrap();
        let ephemeral = EphemeralKeyPair::generate().unwrap();

        let init = initiate(&initiator, &recipient.bundle(false), &ephemeral).unwrap();
        assert_eq!(init.info.one_time_key_id, None);

        let root = respond(&recipient.identity, &recipient.spk, None, &init.info).unwrap();
        assert_eq!(root, init.root_key);

        // Using the one-time key on one side only breaks agreement
        let wrong = respond(
            &recipient.identity,
            &recipient.spk,
            Some(&recipient.otk),
            &init.info,
        )
        .unwrap();
        assert_ne!(wrong, init.root_key);
    }

    #[test]
    fn test_tampered_bundle_rejected() {
        let recipient = Recipient::new();
        let initiator = IdentityKeyPair::generate().unwrap();
        let ephemeral = EphemeralKeyPair::generate().unwrap();

        let mut bundle = recipient.bundle(true);
        bundle.signature[0] ^= 0x01;
        assert!(matches!(
            initiate(&initiator, &bundle, &ephemeral),
            Err(SessionError::InvalidKeyBundle(_))
        ));
    }
}
