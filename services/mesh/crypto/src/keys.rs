//! Identity and ephemeral key pairs, and X25519 shared-secret derivation.

use crate::error::CryptoError;
use crate::kdf::derive_key;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of every public key, secret key and symmetric key in bytes
pub const KEY_SIZE: usize = 32;

const SHARED_SECRET_INFO: &[u8] = b"SacredMesh-DH";

/// Long-lived Ed25519 signing key pair ("who I am")
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a new identity from the operating system RNG
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_with(&mut OsRng)
    }

    /// Generate a new identity from the given RNG
    pub fn generate_with<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, CryptoError> {
        let mut seed = Zeroizing::new([0u8; KEY_SIZE]);
        rng.try_fill_bytes(&mut seed[..])
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self::from_secret_bytes(&seed))
    }

    /// Restore an identity from its 32-byte secret seed
    pub fn from_secret_bytes(bytes: &[u8; KEY_SIZE]) -> Self {
        Self {
            signing: SigningKey::from_bytes(bytes),
        }
    }

    /// Export the secret seed (for persistence)
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    /// Public half of the identity
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.signing.verifying_key().to_bytes())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// X25519 secret corresponding to this identity, for key agreement
    pub fn agreement_secret(&self) -> StaticSecret {
        let scalar = Zeroizing::new(self.signing.to_scalar_bytes());
        StaticSecret::from(*scalar)
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("secret", &"[REDACTED]")
            .field("public", &self.public_key())
            .finish()
    }
}

/// Exported Ed25519 verifying key of an identity
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityPublicKey([u8; KEY_SIZE]);

impl IdentityPublicKey {
    /// Wrap raw key bytes. The bytes are not checked until they are used.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw exported key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Parse as an Ed25519 verifying key
    pub fn verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidKey("identity"))
    }

    /// X25519 public key corresponding to this identity
    pub fn agreement_key(&self) -> Result<AgreementPublicKey, CryptoError> {
        let verifying = self.verifying_key()?;
        Ok(AgreementPublicKey(verifying.to_montgomery().to_bytes()))
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublicKey({})", hex::encode(self.0))
    }
}

/// Short-lived X25519 key-agreement key pair
#[derive(Clone)]
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: AgreementPublicKey,
}

impl EphemeralKeyPair {
    /// Generate a new key pair from the operating system RNG
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_with(&mut OsRng)
    }

    /// Generate a new key pair from the given RNG
    pub fn generate_with<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, CryptoError> {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        rng.try_fill_bytes(&mut bytes[..])
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self::from_secret_bytes(*bytes))
    }

    /// Restore a key pair from its secret scalar bytes
    pub fn from_secret_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = AgreementPublicKey(PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// Export the secret scalar (for persistence)
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Secret half
    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// Public half
    pub fn public_key(&self) -> AgreementPublicKey {
        self.public
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("secret", &"[REDACTED]")
            .field("public", &self.public)
            .finish()
    }
}

/// Exported X25519 public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgreementPublicKey([u8; KEY_SIZE]);

impl AgreementPublicKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw exported key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for AgreementPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgreementPublicKey({})", hex::encode(self.0))
    }
}

/// 256-bit symmetric key, erased from memory on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// Derive an AEAD key from an X25519 exchange.
///
/// Fails with [`CryptoError::InvalidKey`] when the peer key is a low-order
/// point, which would make the output independent of our secret.
pub fn derive_shared_secret(
    private_key: &StaticSecret,
    public_key: &AgreementPublicKey,
) -> Result<SymmetricKey, CryptoError> {
    let shared = private_key.diffie_hellman(&PublicKey::from(public_key.0));
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey("low-order agreement key"));
    }
    derive_key(shared.as_bytes(), None, SHARED_SECRET_INFO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_shared_secret_agrees() {
        let alice = EphemeralKeyPair::generate().unwrap();
        let bob = EphemeralKeyPair::generate().unwrap();

        let ab = derive_shared_secret(alice.secret(), &bob.public_key()).unwrap();
        let ba = derive_shared_secret(bob.secret(), &alice.public_key()).unwrap();
        assert_eq!(ab, ba);

        // Deterministic for the same pair
        let again = derive_shared_secret(alice.secret(), &bob.public_key()).unwrap();
        assert_eq!(ab, again);
    }

    #[test]
    fn test_shared_secret_differs_per_peer() {
        let alice = EphemeralKeyPair::generate().unwrap();
        let bob = EphemeralKeyPair::generate().unwrap();
        let carol = EphemeralKeyPair::generate().unwrap();

        let with_bob = derive_shared_secret(alice.secret(), &bob.public_key()).unwrap();
        let with_carol = derive_shared_secret(alice.secret(), &carol.public_key()).unwrap();
        assert_ne!(with_bob, with_carol);
    }

    #[test]
    fn test_low_order_point_rejected() {
        let alice = EphemeralKeyPair::generate().unwrap();
        let zero = AgreementPublicKey::from_bytes([0u8; KEY_SIZE]);
        assert_eq!(
            derive_shared_secret(alice.secret(), &zero),
            Err(CryptoError::InvalidKey("low-order agreement key"))
        );
    }

    #[test]
    fn test_identity_agreement_matches_public_conversion() {
        let identity = IdentityKeyPair::generate().unwrap();
        let peer = EphemeralKeyPair::generate().unwrap();

        let ours = derive_shared_secret(&identity.agreement_secret(), &peer.public_key()).unwrap();
        let theirs = derive_shared_secret(
            peer.secret(),
            &identity.public_key().agreement_key().unwrap(),
        )
        .unwrap();
        assert_eq!(ours, theirs);
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let a = IdentityKeyPair::generate_with(&mut StdRng::seed_from_u64(7)).unwrap();
        let b = IdentityKeyPair::generate_with(&mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a.public_key(), b.public_key());

        let restored = IdentityKeyPair::from_secret_bytes(&a.secret_bytes());
        assert_eq!(restored.public_key(), a.public_key());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let identity = IdentityKeyPair::generate().unwrap();
        let rendered = format!("{:?}", identity);
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(&hex::encode(*identity.secret_bytes())));
    }
}
