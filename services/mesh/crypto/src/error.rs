//! Cryptographic error types.

use thiserror::Error;

/// Errors raised by the crypto primitives
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The platform RNG failed while generating key material
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Ciphertext, tag, key or nonce did not authenticate
    #[error("authentication failed")]
    Authentication,

    /// AEAD encryption failed
    #[error("encryption failed")]
    Encryption,

    /// Key bytes are not a usable key
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),

    /// Nonce has the wrong length for the cipher
    #[error("invalid nonce length: {0}")]
    InvalidNonce(usize),

    /// HKDF expansion failed
    #[error("key derivation failed")]
    Kdf,
}
