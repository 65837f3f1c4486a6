//! Facade errors returned to the application.

use mesh_crypto::CryptoError;
use mesh_routing::RoutingError;
use mesh_session::SessionError;
use mesh_storage::StorageError;
use mesh_wire::WireError;
use thiserror::Error;

/// Errors surfaced by [`crate::SacredMesh`].
///
/// Per-packet and per-transport failures never show up here; they are
/// logged and absorbed by the inbound pipeline and the router.
#[derive(Error, Debug)]
pub enum MeshError {
    /// `initialize()` has not completed
    #[error("mesh not initialized")]
    NotInitialized,

    /// No contact or session for the recipient
    #[error("no session for contact {0}")]
    NoSession(String),

    /// Key bundle failed signature or format checks
    #[error("invalid key bundle: {0}")]
    InvalidKeyBundle(String),

    /// Message payload violates the payload contract
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Session-layer failure
    #[error("session error: {0}")]
    Session(SessionError),

    /// Key persistence failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Packet framing failure
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Key generation or other primitive failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<SessionError> for MeshError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidKeyBundle(reason) => MeshError::InvalidKeyBundle(reason),
            SessionError::UnknownContact(id) | SessionError::NoSession(id) => MeshError::NoSession(id),
            SessionError::Crypto(e) => MeshError::Crypto(e),
            other => MeshError::Session(other),
        }
    }
}

impl From<WireError> for MeshError {
    fn from(err: WireError) -> Self {
        MeshError::InvalidMessage(err.to_string())
    }
}
