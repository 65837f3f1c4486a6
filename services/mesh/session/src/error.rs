//! Session error types.

use mesh_crypto::CryptoError;
use thiserror::Error;

/// Errors raised while establishing or using a session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Prekey signature did not verify, or the bundle is malformed
    #[error("invalid key bundle: {0}")]
    InvalidKeyBundle(String),

    /// Ciphertext failed to authenticate, or its key was already consumed
    #[error("decryption failed")]
    Decryption,

    /// No contact with this id
    #[error("unknown contact: {0}")]
    UnknownContact(String),

    /// Contact exists but has no sending chain yet
    #[error("no session for contact: {0}")]
    NoSession(String),

    /// No receiving chain for this session id
    #[error("unknown session {0:08x}")]
    UnknownSession(u32),

    /// Message number too far ahead of the receiving chain
    #[error("too many skipped messages: {0}")]
    TooManySkipped(u32),

    /// A contact id is already bound to a different identity key
    #[error("identity key mismatch for contact: {0}")]
    IdentityMismatch(String),

    /// Handshake sender id does not hash to the header's sender hash
    #[error("handshake sender does not match header")]
    SenderMismatch,

    /// Local node id cannot be carried in a handshake
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    /// Key-bundle exchange payload could not be parsed
    #[error("invalid key bundle payload: {0}")]
    InvalidPayload(String),

    /// Underlying primitive failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
