//! In-memory key store for development and testing

use crate::{KeyStore, StorageError, StoredKeys};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

/// Keeps keys for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: RwLock<Option<StoredKeys>>,
}

impl MemoryKeyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `keys`
    pub fn with_keys(keys: StoredKeys) -> Self {
        Self {
            keys: RwLock::new(Some(keys)),
        }
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn load(&self) -> Result<Option<StoredKeys>, StorageError> {
        Ok(self.keys.read().await.clone())
    }

    async fn store(&self, keys: &StoredKeys) -> Result<(), StorageError> {
        debug!("Storing keys for node {} in memory", keys.node_id);
        *self.keys.write().await = Some(keys.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.keys.write().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SECRET_SIZE;

    #[tokio::test]
    async fn test_store_load_clear() {
        let store = MemoryKeyStore::new();
        assert!(store.load().await.unwrap().is_none());

        let keys = StoredKeys {
            node_id: "bob".into(),
            identity_secret: [3; SECRET_SIZE],
            signed_pre_key_secret: [4; SECRET_SIZE],
            created_at: 0,
        };
        store.store(&keys).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(keys));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
