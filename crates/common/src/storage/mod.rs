//! Content storage for encrypted file blobs.
//!
//! Keys are opaque strings of the form `manuscripts/<manuscriptId>/<fileId>.enc`.
//! Backends only ever see ciphertext.

use crate::config::{StorageBackendKind, StorageConfig};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Key for a file blob. File ids are never reused, so neither are keys.
pub fn storage_key(manuscript_id: Uuid, file_id: Uuid) -> String {
    format!("manuscripts/{}/{}.enc", manuscript_id, file_id)
}

/// Blob store contract.
///
/// `put` overwrites, `delete` is idempotent, `get` of a missing key is
/// `BlobNotFound`. `list` order is unspecified.
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Bytes>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Build the configured backend
pub fn from_config(config: &StorageConfig) -> Arc<dyn ContentStore> {
    match config.backend {
        StorageBackendKind::Local => Arc::new(LocalContentStore::new(&config.root_dir)),
        StorageBackendKind::Memory => Arc::new(MemoryContentStore::new()),
    }
}

/// In-memory backend for tests and single-process deployments
#[derive(Debug, Default, Clone)]
pub struct MemoryContentStore {
    blobs: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.blobs.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::BlobNotFound {
                key: key.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.read().await.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Filesystem backend rooted at a directory.
///
/// Writes go to a temporary sibling and are renamed into place, so readers
/// never observe a partial blob.
#[derive(Debug, Clone)]
pub struct LocalContentStore {
    root: PathBuf,
}

impl LocalContentStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let clean = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !clean {
            return Err(AppError::validation("key", format!("invalid storage key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }

    fn storage_error(key: &str, err: std::io::Error) -> AppError {
        AppError::Storage {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::storage_error(key, e))?;
        }

        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| Self::storage_error(key, e))?;

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Self::storage_error(key, e));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::BlobNotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(Self::storage_error(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::storage_error(key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Self::storage_error(key, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::storage_error(prefix, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Self::storage_error(prefix, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Self::storage_error(prefix, e))?;

                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .filter_map(|c| c.as_os_str().to_str())
                    .collect::<Vec<_>>()
                    .join("/");

                // In-flight temporaries are not blobs
                if key.ends_with(".enc") && key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("scriptorium-store-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_storage_key_shape() {
        let manuscript_id = Uuid::new_v4();
        let file_id = Uuid::new_v4();
        assert_eq!(
            storage_key(manuscript_id, file_id),
            format!("manuscripts/{}/{}.enc", manuscript_id, file_id)
        );
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        let store = MemoryContentStore::new();
        store.put("manuscripts/a/1.enc", Bytes::from_static(b"one")).await.unwrap();
        store.put("manuscripts/b/2.enc", Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(store.get("manuscripts/a/1.enc").await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(store.list("manuscripts/a/").await.unwrap(), vec!["manuscripts/a/1.enc"]);

        store.delete("manuscripts/a/1.enc").await.unwrap();
        store.delete("manuscripts/a/1.enc").await.unwrap();
        assert!(!store.exists("manuscripts/a/1.enc").await.unwrap());

        let err = store.get("manuscripts/a/1.enc").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_local_store_roundtrip_and_list() {
        let root = temp_root();
        let store = LocalContentStore::new(&root);
        let key = storage_key(Uuid::new_v4(), Uuid::new_v4());

        store.put(&key, Bytes::from_static(b"ciphertext")).await.unwrap();
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Bytes::from_static(b"ciphertext"));
        assert_eq!(store.list("manuscripts/").await.unwrap(), vec![key.clone()]);

        store.delete(&key).await.unwrap();
        assert!(store.list("manuscripts/").await.unwrap().is_empty());
        assert_eq!(store.get(&key).await.unwrap_err().kind(), ErrorKind::NotFound);

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_local_store_rejects_traversal() {
        let store = LocalContentStore::new(temp_root());
        for key in ["../escape.enc", "/etc/passwd", "a/../../b.enc", ""] {
            let err = store.get(key).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "key {:?}", key);
        }
    }

    #[tokio::test]
    async fn test_local_list_of_missing_root_is_empty() {
        let store = LocalContentStore::new(temp_root());
        assert!(store.list("").await.unwrap().is_empty());
    }
}
