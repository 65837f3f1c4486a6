//! File-based key store

use crate::{KeyStore, StorageError, StoredKeys};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Stores keys as a JSON document, replaced atomically on every write
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    /// Create a store backed by `path`; nothing is touched until first use
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Document path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn load(&self) -> Result<Option<StoredKeys>, StorageError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No key store at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let keys = serde_json::from_str(&content).map_err(|e| {
            StorageError::Corruption(format!("Invalid key store {}: {}", self.path.display(), e))
        })?;
        info!("Loaded keys from {}", self.path.display());
        Ok(Some(keys))
    }

    async fn store(&self, keys: &StoredKeys) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(keys)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, content).await?;
        restrict_permissions(&temp).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        info!("Stored keys for node {} at {}", keys.node_id, self.path.display());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SECRET_SIZE;
    use tempfile::TempDir;

    fn sample() -> StoredKeys {
        StoredKeys {
            node_id: "alice".into(),
            identity_secret: [9; SECRET_SIZE],
            signed_pre_key_secret: [8; SECRET_SIZE],
            created_at: 42,
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(dir.path().join("keys.json"));
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("keys.json");

        FileKeyStore::new(&path).store(&sample()).await.unwrap();
        let reopened = FileKeyStore::new(&path);
        assert_eq!(reopened.load().await.unwrap(), Some(sample()));
        assert!(!reopened.temp_path().exists());

        reopened.clear().await.unwrap();
        assert!(reopened.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileKeyStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys.json");
        FileKeyStore::new(&path).store(&sample()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
