//! Session persistence with optional caching and encryption at rest.
//!
//! Records are stored as `{"history": [...], "model": "...", "instruction": "..."}`
//! under a key derived from the request scope (`system`, `user_<id>`,
//! `channel_<id>`). Read, parse and decrypt failures never reach the caller:
//! a fresh default record is synthesised and persisted instead.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::crypto::RecordCipher;
use crate::session::cache::SessionCache;
use crate::storage::{KeyValueStore, StorageError};
use crate::types::{ChatMessage, SessionRecord, SessionScope};

/// Behavioural switches for a [`SessionStore`].
#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Model assigned to synthesised records.
    pub default_model: String,
    /// Broadcast channel stored under the `system` key.
    pub system_channel: Option<u64>,
    /// Encrypt direct-message scopes.
    pub encrypt_user_data: bool,
    /// Encrypt channel and system scopes.
    pub encrypt_channels: bool,
    /// Seed every new record with the static instruction.
    pub apply_instruction_to_all: bool,
    /// Static instruction file.
    pub instruction_file: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o".to_string(),
            system_channel: None,
            encrypt_user_data: false,
            encrypt_channels: false,
            apply_instruction_to_all: false,
            instruction_file: None,
        }
    }
}

/// Loads and saves [`SessionRecord`]s through a key-value store.
pub struct SessionStore {
    backend: Arc<dyn KeyValueStore>,
    cipher: Option<Arc<dyn RecordCipher>>,
    cache: Option<SessionCache>,
    settings: SessionSettings,
}

impl SessionStore {
    /// Create a store. Pass `cache: None` to disable caching.
    pub fn new(
        backend: Arc<dyn KeyValueStore>,
        cipher: Option<Arc<dyn RecordCipher>>,
        cache: Option<SessionCache>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            backend,
            cipher,
            cache,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn default_model(&self) -> &str {
        &self.settings.default_model
    }

    /// The cache, when enabled.
    pub fn cache(&self) -> Option<&SessionCache> {
        self.cache.as_ref()
    }

    /// Resolve the scope a request addresses.
    pub fn scope(&self, user_id: Option<u64>, channel_id: Option<u64>) -> SessionScope {
        SessionScope::resolve(user_id, channel_id, self.settings.system_channel)
    }

    /// Only requests that carry a user id go through the cache.
    fn cache_for(&self, user_id: Option<u64>) -> Option<&SessionCache> {
        user_id.and(self.cache.as_ref())
    }

    // ─────────────────────────────────────────
    // Load
    // ─────────────────────────────────────────

    /// Load the record for a request, synthesising and persisting a default if none is readable.
    pub async fn load(&self, user_id: Option<u64>, channel_id: Option<u64>) -> SessionRecord {
        let scope = self.scope(user_id, channel_id);

        if let Some(cache) = self.cache_for(user_id) {
            if let Some(record) = cache.get(scope) {
                debug!(scope = %scope, "session cache hit");
                return record;
            }
        }

        let record = match self.read_record(scope).await {
            Some(record) => record,
            None => {
                let record = self.default_record(scope).await;
                if let Err(e) = self.write_record(scope, &record).await {
                    error!(scope = %scope, error = %e, "failed to persist default session");
                }
                record
            }
        };

        if let Some(cache) = self.cache_for(user_id) {
            cache.set(scope, record.clone());
        }
        record
    }

    /// Read and decode a stored record; `None` on absence or any failure.
    async fn read_record(&self, scope: SessionScope) -> Option<SessionRecord> {
        let key = scope.storage_key();
        let bytes = match self.backend.load(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(scope = %scope, error = %e, "failed to read session");
                return None;
            }
        };

        match serde_json::from_slice::<SessionRecord>(&bytes) {
            Ok(record) => return Some(record),
            Err(e) => debug!(scope = %scope, error = %e, "session is not plain JSON"),
        }

        let cipher = match &self.cipher {
            Some(cipher) => cipher,
            None => {
                warn!(scope = %scope, "unreadable session and no cipher configured");
                return None;
            }
        };

        let plaintext = match cipher.decrypt(&key, &bytes).await {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(scope = %scope, error = %e, "failed to decrypt session");
                return None;
            }
        };

        match serde_json::from_slice::<SessionRecord>(&plaintext) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(scope = %scope, error = %e, "decrypted session is not a valid record");
                None
            }
        }
    }

    /// A new record for `scope`, seeded with the static instruction where configured.
    async fn default_record(&self, scope: SessionScope) -> SessionRecord {
        let mut record = SessionRecord::new(self.settings.default_model.clone());
        if self.settings.apply_instruction_to_all || scope == SessionScope::System {
            let instruction = self.instruction_text().await;
            if !instruction.is_empty() {
                record.history.push(ChatMessage::system(instruction.clone()));
                record.instruction = instruction;
            }
        }
        record
    }

    /// Contents of the static instruction file, empty when missing or unset.
    pub async fn instruction_text(&self) -> String {
        let Some(path) = &self.settings.instruction_file else {
            return String::new();
        };
        match tokio::fs::read_to_string(path).await {
            Ok(text) => text.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read instruction file");
                String::new()
            }
        }
    }

    // ─────────────────────────────────────────
    // Save
    // ─────────────────────────────────────────

    /// Persist a record for a request.
    ///
    /// Empty records are rejected without writing. The cache is updated even
    /// when the durable write fails; the write error is returned for logging.
    pub async fn save(
        &self,
        user_id: Option<u64>,
        record: &SessionRecord,
        channel_id: Option<u64>,
    ) -> Result<(), StorageError> {
        let scope = self.scope(user_id, channel_id);
        if record.is_empty() {
            warn!(scope = %scope, "refusing to save an empty session");
            return Ok(());
        }

        let result = self.write_record(scope, record).await;
        if let Err(e) = &result {
            error!(scope = %scope, error = %e, "failed to save session");
        }

        if let Some(cache) = self.cache_for(user_id) {
            cache.set(scope, record.clone());
        }
        result
    }

    fn should_encrypt(&self, scope: SessionScope) -> bool {
        if scope.is_direct() {
            self.settings.encrypt_user_data
        } else {
            self.settings.encrypt_channels
        }
    }

    async fn write_record(&self, scope: SessionScope, record: &SessionRecord) -> Result<(), StorageError> {
        let key = scope.storage_key();
        let json = serde_json::to_vec_pretty(record).map_err(|e| StorageError::serialization(&key, e))?;

        let bytes = match (&self.cipher, self.should_encrypt(scope)) {
            (Some(cipher), true) => cipher.encrypt(&key, &json).await?,
            (None, true) => {
                warn!(scope = %scope, "encryption requested but no cipher configured, writing plain JSON");
                json
            }
            (_, false) => json,
        };

        self.backend.save(&key, &bytes).await
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AesGcmCipher;
    use crate::storage::{FsStore, MemoryStore};
    use async_trait::async_trait;
    use tempfile::tempdir;

    fn settings() -> SessionSettings {
        SessionSettings {
            default_model: "gpt-4o-mini".into(),
            system_channel: Some(100),
            ..Default::default()
        }
    }

    fn make_store(settings: SessionSettings) -> (SessionStore, Arc<MemoryStore>) {
        let backend = Arc::new(MemoryStore::new());
        let cipher: Arc<dyn RecordCipher> = Arc::new(AesGcmCipher::new(Arc::new(MemoryStore::new())));
        let store = SessionStore::new(backend.clone(), Some(cipher), Some(SessionCache::default()), settings);
        (store, backend)
    }

    #[tokio::test]
    async fn test_default_synthesis_is_persisted() {
        let (store, backend) = make_store(settings());

        let record = store.load(Some(1), None).await;
        assert!(record.history.is_empty());
        assert_eq!(record.model, "gpt-4o-mini");

        let raw = backend.load("user_1").await.unwrap().unwrap();
        let persisted: SessionRecord = serde_json::from_slice(&raw).unwrap();
        assert_eq!(persisted, record);

        // A second store over the same backend reads it back without re-synthesising
        let again = SessionStore::new(backend.clone(), None, None, SessionSettings {
            default_model: "other".into(),
            ..settings()
        });
        assert_eq!(again.load(Some(1), None).await, record);
    }

    #[tokio::test]
    async fn test_scope_keys() {
        let (store, backend) = make_store(settings());
        store.load(Some(1), None).await;
        store.load(Some(1), Some(7)).await;
        store.load(None, Some(100)).await;
        assert_eq!(
            backend.keys().await.unwrap(),
            vec!["channel_7", "system", "user_1"]
        );
    }

    #[tokio::test]
    async fn test_instruction_seeding() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("system_prompt.txt");
        std::fs::write(&path, "You are a pirate.\n").unwrap();

        let (store, _) = make_store(SessionSettings {
            instruction_file: Some(path.clone()),
            ..settings()
        });
        // Only the system scope is seeded by default
        assert!(store.load(Some(1), None).await.history.is_empty());
        let system = store.load(None, Some(100)).await;
        assert_eq!(system.instruction, "You are a pirate.");
        assert_eq!(system.history, vec![ChatMessage::system("You are a pirate.")]);

        let (store, _) = make_store(SessionSettings {
            instruction_file: Some(path),
            apply_instruction_to_all: true,
            ..settings()
        });
        let dm = store.load(Some(2), None).await;
        assert_eq!(dm.history, vec![ChatMessage::system("You are a pirate.")]);
    }

    #[tokio::test]
    async fn test_missing_instruction_file() {
        let (store, _) = make_store(SessionSettings {
            instruction_file: Some(PathBuf::from("/nonexistent/prompt.txt")),
            apply_instruction_to_all: true,
            ..settings()
        });
        let record = store.load(Some(1), None).await;
        assert!(record.history.is_empty());
        assert!(record.instruction.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let (store, _) = make_store(settings());
        let mut record = store.load(Some(3), None).await;
        record.history.push(ChatMessage::user("hi"));
        store.save(Some(3), &record, None).await.unwrap();

        assert_eq!(store.load(Some(3), None).await.history.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_record_rejected() {
        let (store, backend) = make_store(settings());
        store.save(Some(9), &SessionRecord::default(), None).await.unwrap();
        assert!(backend.load("user_9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dm_encryption() {
        let (store, backend) = make_store(SessionSettings {
            encrypt_user_data: true,
            ..settings()
        });
        let mut record = SessionRecord::new("gpt-4o");
        record.history.push(ChatMessage::user("secret"));
        store.save(Some(4), &record, None).await.unwrap();
        store.save(Some(4), &record, Some(8)).await.unwrap();

        let dm = backend.load("user_4").await.unwrap().unwrap();
        assert!(serde_json::from_slice::<SessionRecord>(&dm).is_err());
        let channel = backend.load("channel_8").await.unwrap().unwrap();
        assert!(serde_json::from_slice::<SessionRecord>(&channel).is_ok());

        store.cache().unwrap().invalidate(SessionScope::Direct(4));
        assert_eq!(store.load(Some(4), None).await, record);
    }

    #[tokio::test]
    async fn test_plain_record_read_when_encryption_enabled() {
        let (store, backend) = make_store(SessionSettings {
            encrypt_user_data: true,
            ..settings()
        });
        backend
            .save("user_5", br#"{"history":[{"role":"user","content":"old"}],"model":"gpt-4o","instruction":""}"#)
            .await
            .unwrap();
        let record = store.load(Some(5), None).await;
        assert_eq!(record.history, vec![ChatMessage::user("old")]);
    }

    #[tokio::test]
    async fn test_corrupt_record_replaced_with_default() {
        let (store, backend) = make_store(settings());
        backend.save("user_6", b"{{ definitely broken").await.unwrap();

        let record = store.load(Some(6), None).await;
        assert_eq!(record, SessionRecord::new("gpt-4o-mini"));

        let raw = backend.load("user_6").await.unwrap().unwrap();
        assert!(serde_json::from_slice::<SessionRecord>(&raw).is_ok());
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_loads() {
        let (store, backend) = make_store(settings());
        store.load(Some(1), None).await;

        // Edit behind the cache's back; the cached copy wins until it expires
        backend
            .save("user_1", br#"{"history":[],"model":"edited","instruction":""}"#)
            .await
            .unwrap();
        assert_eq!(store.load(Some(1), None).await.model, "gpt-4o-mini");

        store.cache().unwrap().invalidate(SessionScope::Direct(1));
        assert_eq!(store.load(Some(1), None).await.model, "edited");
    }

    #[tokio::test]
    async fn test_requests_without_user_bypass_cache() {
        let (store, _) = make_store(settings());
        store.load(None, Some(100)).await;
        assert!(store.cache().unwrap().is_empty());
    }

    struct FailingWrites;

    #[async_trait]
    impl KeyValueStore for FailingWrites {
        async fn load(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(None)
        }
        async fn save(&self, key: &str, _bytes: &[u8]) -> Result<(), StorageError> {
            Err(StorageError::io(key, std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }
        async fn delete(&self, _key: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn keys(&self) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_failed_write_still_updates_cache() {
        let store = SessionStore::new(Arc::new(FailingWrites), None, Some(SessionCache::default()), settings());
        let mut record = SessionRecord::new("gpt-4o");
        record.history.push(ChatMessage::user("hello"));

        assert!(store.save(Some(1), &record, None).await.is_err());
        assert_eq!(store.load(Some(1), None).await, record);
    }

    #[tokio::test]
    async fn test_fs_backend() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(FsStore::new(dir.path()).unwrap());
        let store = SessionStore::new(backend, None, None, settings());
        store.load(Some(11), None).await;
        assert!(dir.path().join("user_11.json").exists());
    }
}
