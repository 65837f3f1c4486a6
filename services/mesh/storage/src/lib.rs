//! Identity and prekey persistence for sacred mesh with pluggable backends.
//!
//! A node's identity must survive restarts: peers pin its identity key, and
//! handshakes already in flight target its signed prekey. This crate stores
//! both secrets behind the [`KeyStore`] trait.
//!
//! ## Features
//!
//! - **In-Memory**: for tests and throwaway nodes
//! - **File**: JSON document written atomically with owner-only permissions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of every stored secret
pub const SECRET_SIZE: usize = 32;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored document could not be parsed
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Secrets that make up a node's persistent identity
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct StoredKeys {
    /// Node id the identity was created for
    pub node_id: String,
    /// Identity signing key seed
    #[serde(with = "hex_secret")]
    pub identity_secret: [u8; SECRET_SIZE],
    /// Current signed prekey secret
    #[serde(with = "hex_secret")]
    pub signed_pre_key_secret: [u8; SECRET_SIZE],
    /// Unix seconds at creation
    pub created_at: u64,
}

impl fmt::Debug for StoredKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredKeys")
            .field("node_id", &self.node_id)
            .field("identity_secret", &"[REDACTED]")
            .field("signed_pre_key_secret", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

mod hex_secret {
    use super::SECRET_SIZE;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; SECRET_SIZE], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; SECRET_SIZE], D::Error> {
        let raw = String::deserialize(deserializer)?;
        let mut out = [0u8; SECRET_SIZE];
        hex::decode_to_slice(raw.trim(), &mut out).map_err(D::Error::custom)?;
        Ok(out)
    }
}

/// Persistent home of a node's secrets
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Load the stored keys, or `None` on first start
    async fn load(&self) -> Result<Option<StoredKeys>, StorageError>;

    /// Replace the stored keys
    async fn store(&self, keys: &StoredKeys) -> Result<(), StorageError>;

    /// Forget the stored keys
    async fn clear(&self) -> Result<(), StorageError>;
}

/// Key store backend selection
#[derive(Clone, Debug, Default)]
pub enum KeyStoreMode {
    /// In-memory storage (tests and ephemeral nodes)
    #[default]
    InMemory,
    /// JSON file at the given path
    File {
        /// Document path
        path: PathBuf,
    },
}

// Re-export backend implementations
pub use backend::file::FileKeyStore;
pub use backend::mem::MemoryKeyStore;

impl KeyStoreMode {
    /// Open the configured backend
    pub fn open(self) -> Box<dyn KeyStore> {
        match self {
            KeyStoreMode::InMemory => Box::new(MemoryKeyStore::new()),
            KeyStoreMode::File { path } => Box::new(FileKeyStore::new(path)),
        }
    }
}
