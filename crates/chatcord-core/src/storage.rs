//! Key-value persistence used by sessions, reminders, bans and key files.
//!
//! Every record is a whole-value overwrite; there are no partial updates.
//! [`FsStore`] keeps one `<key>.json` file per key under a directory,
//! [`MemoryStore`] keeps bytes in a map for tests and ephemeral runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::utils::safe_filename;

// ─────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid record for '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("encryption failed for '{scope}': {reason}")]
    Crypto { scope: String, reason: String },

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
}

impl StorageError {
    pub fn io(key: &str, source: std::io::Error) -> Self {
        StorageError::Io {
            key: key.to_string(),
            source,
        }
    }

    pub fn serialization(key: &str, source: serde_json::Error) -> Self {
        StorageError::Serialization {
            key: key.to_string(),
            source,
        }
    }
}

// ─────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────

/// Durable byte storage addressed by string keys.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the bytes stored under `key`, `None` when absent.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Overwrite the bytes stored under `key`.
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// All keys currently stored.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

// ─────────────────────────────────────────────
// Filesystem store
// ─────────────────────────────────────────────

const EXTENSION: &str = "json";

/// One JSON file per key inside `dir`.
#[derive(Clone, Debug)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.{EXTENSION}", safe_filename(key))))
    }
}

#[async_trait]
impl KeyValueStore for FsStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        // Write-then-rename: readers never observe a partial record
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        debug!(key = %key, path = %path.display(), bytes = bytes.len(), "saved record");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let dir_key = self.dir.display().to_string();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StorageError::io(&dir_key, e))?;

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&dir_key, e))?
        {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// ─────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────

/// Non-durable store backed by a map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        self.entries
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_fs_store_missing_key() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        assert!(store.load("user_1").await.unwrap().is_none());
        assert!(!store.delete("user_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_fs_store_writes_json_file() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();

        store.save("user_42", br#"{"history":[]}"#).await.unwrap();

        let path = dir.path().join("user_42.json");
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(path).unwrap(), r#"{"history":[]}"#);
        assert_eq!(
            store.load("user_42").await.unwrap().as_deref(),
            Some(&br#"{"history":[]}"#[..])
        );
    }

    #[tokio::test]
    async fn test_fs_store_overwrite_and_delete() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();

        store.save("k", b"one").await.unwrap();
        store.save("k", b"two").await.unwrap();
        assert_eq!(store.load("k").await.unwrap().unwrap(), b"two");

        assert!(store.delete("k").await.unwrap());
        assert!(store.load("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_store_keys_skip_other_files() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        store.save("b_ban", b"{}").await.unwrap();
        store.save("a_ban", b"{}").await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["a_ban", "b_ban"]);
    }

    #[tokio::test]
    async fn test_fs_store_rejects_empty_key() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        let err = store.save("", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_fs_store_sanitizes_key() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        store.save("../escape", b"x").await.unwrap();
        assert!(dir.path().join(".._escape.json").exists());
    }

    #[tokio::test]
    async fn test_memory_store_round() {
        let store = MemoryStore::new();
        store.save("x", b"1").await.unwrap();
        store.save("a", b"2").await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["a", "x"]);
        assert!(store.delete("x").await.unwrap());
        assert!(store.load("x").await.unwrap().is_none());
    }
}
