//! Encryption at rest for session records.
//!
//! Each scope (`user_42`, `channel_7`, `system`) gets its own random AES-256 key,
//! persisted as `<scope>_key.json` in a key store. Ciphertext is
//! `base64(nonce || aes_gcm(plaintext))`, which never parses as JSON, so readers
//! can tell encrypted records from plain ones.

use std::collections::HashMap;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::storage::{KeyValueStore, StorageError};

/// Size of the AES-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Size of an AES-256 key in bytes
const KEY_SIZE: usize = 32;

/// Encrypts and decrypts record bytes for a named scope.
#[async_trait]
pub trait RecordCipher: Send + Sync {
    async fn encrypt(&self, scope: &str, plaintext: &[u8]) -> Result<Vec<u8>, StorageError>;

    async fn decrypt(&self, scope: &str, ciphertext: &[u8]) -> Result<Vec<u8>, StorageError>;
}

/// On-disk key file.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    /// Base64-encoded 32-byte key
    key: String,
}

/// AES-256-GCM cipher with one lazily generated key per scope.
pub struct AesGcmCipher {
    keys: Arc<dyn KeyValueStore>,
    loaded: Mutex<HashMap<String, [u8; KEY_SIZE]>>,
}

impl AesGcmCipher {
    pub fn new(keys: Arc<dyn KeyValueStore>) -> Self {
        Self {
            keys,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    fn key_name(scope: &str) -> String {
        format!("{scope}_key")
    }

    /// Return the key for `scope`, creating and persisting one on first use.
    async fn key_for(&self, scope: &str) -> Result<[u8; KEY_SIZE], StorageError> {
        let mut loaded = self.loaded.lock().await;
        if let Some(key) = loaded.get(scope) {
            return Ok(*key);
        }

        let name = Self::key_name(scope);
        let key = match self.keys.load(&name).await? {
            Some(bytes) => {
                let file: KeyFile = serde_json::from_slice(&bytes)
                    .map_err(|e| StorageError::serialization(&name, e))?;
                let raw = STANDARD
                    .decode(file.key.trim())
                    .map_err(|e| crypto_error(scope, e))?;
                <[u8; KEY_SIZE]>::try_from(raw.as_slice())
                    .map_err(|_| crypto_error(scope, "key file holds a key of the wrong length"))?
            }
            None => {
                let mut key = [0u8; KEY_SIZE];
                rand::rngs::OsRng.fill_bytes(&mut key);
                let file = KeyFile {
                    key: STANDARD.encode(key),
                };
                let json = serde_json::to_vec_pretty(&file)
                    .map_err(|e| StorageError::serialization(&name, e))?;
                self.keys.save(&name, &json).await?;
                info!(scope = %scope, "generated encryption key");
                key
            }
        };

        loaded.insert(scope.to_string(), key);
        Ok(key)
    }
}

#[async_trait]
impl RecordCipher for AesGcmCipher {
    async fn encrypt(&self, scope: &str, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let key = self.key_for(scope).await?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| crypto_error(scope, e))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| crypto_error(scope, e))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined).into_bytes())
    }

    async fn decrypt(&self, scope: &str, ciphertext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let text = std::str::from_utf8(ciphertext).map_err(|e| crypto_error(scope, e))?;
        let combined = STANDARD
            .decode(text.trim())
            .map_err(|e| crypto_error(scope, e))?;
        if combined.len() <= NONCE_SIZE {
            return Err(crypto_error(scope, "ciphertext too short"));
        }

        let key = self.key_for(scope).await?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| crypto_error(scope, e))?;
        let (nonce_bytes, body) = combined.split_at(NONCE_SIZE);
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|e| crypto_error(scope, e))
    }
}

fn crypto_error(scope: &str, reason: impl std::fmt::Display) -> StorageError {
    StorageError::Crypto {
        scope: scope.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FsStore, MemoryStore};

    fn make_cipher() -> (AesGcmCipher, Arc<MemoryStore>) {
        let keys = Arc::new(MemoryStore::new());
        (AesGcmCipher::new(keys.clone()), keys)
    }

    #[tokio::test]
    async fn test_encrypt_then_decrypt() {
        let (cipher, _keys) = make_cipher();
        let plaintext = br#"{"history":[],"model":"gpt-4o","instruction":""}"#;

        let sealed = cipher.encrypt("user_1", plaintext).await.unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&sealed).is_err());

        let opened = cipher.decrypt("user_1", &sealed).await.unwrap();
        assert_eq!(opened, plaintext);
    }

    #[tokio::test]
    async fn test_nonce_differs_per_call() {
        let (cipher, _keys) = make_cipher();
        let a = cipher.encrypt("user_1", b"same").await.unwrap();
        let b = cipher.encrypt("user_1", b"same").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_key_persisted_per_scope() {
        let (cipher, keys) = make_cipher();
        cipher.encrypt("user_1", b"x").await.unwrap();
        cipher.encrypt("channel_2", b"x").await.unwrap();
        assert_eq!(
            keys.keys().await.unwrap(),
            vec!["channel_2_key", "user_1_key"]
        );
    }

    #[tokio::test]
    async fn test_wrong_scope_fails() {
        let (cipher, _keys) = make_cipher();
        let sealed = cipher.encrypt("user_1", b"secret").await.unwrap();
        let err = cipher.decrypt("user_2", &sealed).await.unwrap_err();
        assert!(matches!(err, StorageError::Crypto { .. }));
    }

    #[tokio::test]
    async fn test_garbage_fails() {
        let (cipher, _keys) = make_cipher();
        assert!(cipher.decrypt("user_1", b"not base64 !!").await.is_err());
        assert!(cipher.decrypt("user_1", b"AAAA").await.is_err());
    }

    #[tokio::test]
    async fn test_key_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let sealed = {
            let store = Arc::new(FsStore::new(dir.path()).unwrap());
            AesGcmCipher::new(store).encrypt("user_9", b"hello").await.unwrap()
        };

        let store = Arc::new(FsStore::new(dir.path()).unwrap());
        let opened = AesGcmCipher::new(store).decrypt("user_9", &sealed).await.unwrap();
        assert_eq!(opened, b"hello");
    }
}
