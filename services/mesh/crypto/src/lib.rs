//! Signing, key agreement, AEAD, nonces and fingerprints for sacred mesh.
//!
//! This crate is a stateless set of primitives. Nothing here holds global
//! state: every key lives in the value that owns it, and every operation that
//! needs randomness has a `*_with` variant taking an explicit RNG so tests can
//! substitute a seeded generator.
//!
//! ## Algorithms
//!
//! - **Identity**: Ed25519 signing keys. The same secret doubles as an X25519
//!   agreement key (birational map), so a single identity key takes part in
//!   the X3DH-style handshake.
//! - **Key agreement**: X25519, with the raw DH output run through
//!   HKDF-SHA256 before use.
//! - **AEAD**: ChaCha20-Poly1305 with a 12-byte nonce and a detached 16-byte
//!   tag.
//! - **Fingerprints / sender hashes**: truncated SHA-256.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod digest;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod signature;

// Re-export main types
pub use aead::{
    decrypt, decrypt_with_aad, encrypt, encrypt_with_aad, generate_nonce, generate_nonce_with,
    Sealed, NONCE_SIZE, TAG_SIZE,
};
pub use digest::{create_fingerprint, hash_sender_id, SenderIdHash, SENDER_HASH_SIZE};
pub use error::CryptoError;
pub use kdf::{derive_key, derive_key_pair};
pub use keys::{
    derive_shared_secret, AgreementPublicKey, EphemeralKeyPair, IdentityKeyPair,
    IdentityPublicKey, SymmetricKey, KEY_SIZE,
};
pub use signature::{sign, verify, SIGNATURE_SIZE};
