//! Reminder persistence: one JSON array per user under `<user_id>_reminders`.
//!
//! Every read-modify-write of a user's list holds that user's lock, so the
//! delivery loop and user commands never overwrite each other's changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use chatcord_core::storage::{KeyValueStore, StorageError};

use crate::types::ReminderRecord;

const KEY_SUFFIX: &str = "_reminders";

/// Per-user reminder lists over a key-value store.
pub struct ReminderStore {
    store: Arc<dyn KeyValueStore>,
    locks: Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>,
}

impl ReminderStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_user(&self, user_id: u64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(user_id).or_default())
        };
        lock.lock_owned().await
    }

    fn key(user_id: u64) -> String {
        format!("{user_id}{KEY_SUFFIX}")
    }

    fn user_from_key(key: &str) -> Option<u64> {
        key.strip_suffix(KEY_SUFFIX)?.parse().ok()
    }

    // ─────────────────────────────────────────
    // Whole-list access
    // ─────────────────────────────────────────

    /// All reminders of `user_id`, in stored order. Missing file ⇒ empty.
    pub async fn load(&self, user_id: u64) -> Result<Vec<ReminderRecord>, StorageError> {
        let key = Self::key(user_id);
        match self.store.load(&key).await? {
            None => Ok(Vec::new()),
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StorageError::serialization(&key, e))
            }
        }
    }

    /// Overwrite the list of `user_id`. An empty list removes the file.
    pub async fn save(&self, user_id: u64, reminders: &[ReminderRecord]) -> Result<(), StorageError> {
        let _guard = self.lock_user(user_id).await;
        self.write(user_id, reminders).await
    }

    async fn write(&self, user_id: u64, reminders: &[ReminderRecord]) -> Result<(), StorageError> {
        let key = Self::key(user_id);
        if reminders.is_empty() {
            self.store.delete(&key).await?;
            return Ok(());
        }
        let json =
            serde_json::to_vec_pretty(reminders).map_err(|e| StorageError::serialization(&key, e))?;
        self.store.save(&key, &json).await
    }

    // ─────────────────────────────────────────
    // Record operations
    // ─────────────────────────────────────────

    /// Store a new reminder and return it with its id.
    pub async fn add(
        &self,
        user_id: u64,
        message: &str,
        time: DateTime<Utc>,
        utc_offset_minutes: Option<i32>,
    ) -> Result<ReminderRecord, StorageError> {
        self.add_at(user_id, message, time, utc_offset_minutes, Utc::now()).await
    }

    /// Like [`add`](Self::add); the id is derived from `now` (epoch millis,
    /// bumped until unused for this user).
    pub async fn add_at(
        &self,
        user_id: u64,
        message: &str,
        time: DateTime<Utc>,
        utc_offset_minutes: Option<i32>,
        now: DateTime<Utc>,
    ) -> Result<ReminderRecord, StorageError> {
        let _guard = self.lock_user(user_id).await;
        let mut reminders = self.load(user_id).await?;

        let mut candidate = now.timestamp_millis();
        while reminders.iter().any(|r| r.id == candidate.to_string()) {
            candidate += 1;
        }

        let record = ReminderRecord {
            id: candidate.to_string(),
            message: message.to_string(),
            time,
            utc_offset_minutes,
        };
        reminders.push(record.clone());
        self.write(user_id, &reminders).await?;

        info!(user_id, id = %record.id, time = %record.time, "reminder stored");
        Ok(record)
    }

    /// Delete one reminder. Returns whether it existed.
    pub async fn remove(&self, user_id: u64, id: &str) -> Result<bool, StorageError> {
        let _guard = self.lock_user(user_id).await;
        let mut reminders = self.load(user_id).await?;
        let before = reminders.len();
        reminders.retain(|r| r.id != id);
        if reminders.len() == before {
            return Ok(false);
        }
        self.write(user_id, &reminders).await?;
        debug!(user_id, id = %id, "reminder removed");
        Ok(true)
    }

    /// The reminders of `user_id`, sorted by fire time.
    pub async fn list(&self, user_id: u64) -> Result<Vec<ReminderRecord>, StorageError> {
        let mut reminders = self.load(user_id).await?;
        reminders.sort_by_key(|r| r.time);
        Ok(reminders)
    }

    pub async fn get(&self, user_id: u64, id: &str) -> Result<Option<ReminderRecord>, StorageError> {
        Ok(self.load(user_id).await?.into_iter().find(|r| r.id == id))
    }

    /// Move a reminder to a new fire time. Returns whether it existed.
    pub async fn reschedule(
        &self,
        user_id: u64,
        id: &str,
        time: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let _guard = self.lock_user(user_id).await;
        let mut reminders = self.load(user_id).await?;
        let Some(record) = reminders.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        record.time = time;
        self.write(user_id, &reminders).await?;
        debug!(user_id, id = %id, time = %time, "reminder rescheduled");
        Ok(true)
    }

    /// Every stored reminder of every user. Unreadable files are skipped.
    pub async fn all(&self) -> Result<Vec<(u64, ReminderRecord)>, StorageError> {
        let mut out = Vec::new();
        for key in self.store.keys().await? {
            let Some(user_id) = Self::user_from_key(&key) else {
                continue;
            };
            match self.load(user_id).await {
                Ok(reminders) => out.extend(reminders.into_iter().map(|r| (user_id, r))),
                Err(e) => warn!(user_id, error = %e, "skipping unreadable reminder file"),
            }
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
