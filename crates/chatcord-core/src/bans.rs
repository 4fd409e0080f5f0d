//! Ban registry: per-user ban records with lazy and periodic expiry.
//!
//! Each ban is stored as `<user_id>_ban` in its own key-value store:
//! `{"user_id": 1, "reason": "...", "timestamp": "...", "duration": {"days": 3} | null}`.
//! A `null` duration is permanent. Expired bans are deleted the next time they
//! are looked up, and a background sweep removes the rest every hour.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::storage::{KeyValueStore, StorageError};

// ─────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────

/// Default sweep interval: 1 hour.
pub const DEFAULT_CLEANUP_INTERVAL_S: u64 = 60 * 60;

/// Reply when ban status cannot be determined.
pub const VERIFY_FAILED_MESSAGE: &str =
    ":warning: **Couldn't verify your access right now.** Please try again later.";

const KEY_SUFFIX: &str = "_ban";

// ─────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanDuration {
    pub days: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BanRecord {
    pub user_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banned_by: Option<u64>,
    pub reason: String,
    #[serde(with = "crate::utils::iso8601")]
    pub timestamp: DateTime<Utc>,
    pub duration: Option<BanDuration>,
}

impl BanRecord {
    /// When the ban lifts, `None` for permanent bans. Fails when the end
    /// date is not representable.
    pub fn expires_at(&self) -> Result<Option<DateTime<Utc>>, BanError> {
        let Some(d) = self.duration else {
            return Ok(None);
        };
        chrono::Duration::try_days(d.days)
            .and_then(|span| self.timestamp.checked_add_signed(span))
            .map(Some)
            .ok_or(BanError::InvalidDuration(d.days))
    }

    pub fn is_permanent(&self) -> bool {
        self.duration.is_none()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> Result<bool, BanError> {
        Ok(self.expires_at()?.is_some_and(|end| now > end))
    }

    /// The text shown to a blocked user.
    pub fn message(&self) -> Result<String, BanError> {
        let term = match self.expires_at()? {
            None => "**Permanent ban.**".to_string(),
            Some(end) => format!("**Unban date:** {} UTC", end.format("%Y-%m-%d %H:%M:%S")),
        };
        Ok(format!(
            ":no_entry: **Your access to this bot has been blocked.**\n**Reason:** {}\n{}",
            self.reason, term
        ))
    }
}

/// Result of a ban lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum BanStatus {
    NotBanned,
    Banned { record: BanRecord, message: String },
}

impl BanStatus {
    pub fn is_banned(&self) -> bool {
        matches!(self, BanStatus::Banned { .. })
    }
}

/// Gate decision for an incoming interaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BanCheck {
    Allowed,
    Blocked(String),
}

#[derive(Debug, Error)]
pub enum BanError {
    #[error("only the bot administrator can do that")]
    Unauthorized,

    #[error("ban length of {0} days is out of range")]
    InvalidDuration(i64),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ─────────────────────────────────────────────
// BanRegistry
// ─────────────────────────────────────────────

struct Cleanup {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Stores ban records and answers ban queries.
pub struct BanRegistry {
    store: Arc<dyn KeyValueStore>,
    /// The only user allowed to list bans; 0 means nobody.
    admin_id: u64,
    cleanup_interval: Duration,
    cleanup: Mutex<Option<Cleanup>>,
}

impl BanRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, admin_id: u64, cleanup_interval: Option<Duration>) -> Self {
        Self {
            store,
            admin_id,
            cleanup_interval: cleanup_interval
                .unwrap_or(Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_S)),
            cleanup: Mutex::new(None),
        }
    }

    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_id != 0 && user_id == self.admin_id
    }

    fn key(user_id: u64) -> String {
        format!("{user_id}{KEY_SUFFIX}")
    }

    fn user_from_key(key: &str) -> Option<u64> {
        key.strip_suffix(KEY_SUFFIX)?.parse().ok()
    }

    // ─────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────

    /// Ban a user. `days: None` is permanent.
    pub async fn ban(
        &self,
        user_id: u64,
        reason: &str,
        days: Option<i64>,
        banned_by: Option<u64>,
    ) -> Result<BanRecord, BanError> {
        self.ban_at(user_id, reason, days, banned_by, Utc::now()).await
    }

    pub async fn ban_at(
        &self,
        user_id: u64,
        reason: &str,
        days: Option<i64>,
        banned_by: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<BanRecord, BanError> {
        if let Some(days) = days.filter(|d| *d <= 0) {
            return Err(BanError::InvalidDuration(days));
        }
        let record = BanRecord {
            user_id,
            banned_by,
            reason: reason.to_string(),
            timestamp: now,
            duration: days.map(|days| BanDuration { days }),
        };
        record.expires_at()?;
        let key = Self::key(user_id);
        let json = serde_json::to_vec_pretty(&record).map_err(|e| StorageError::serialization(&key, e))?;
        self.store.save(&key, &json).await?;
        warn!(user_id, reason = %reason, days = ?days, "user banned");
        Ok(record)
    }

    /// Lift a ban. Returns whether one existed.
    pub async fn unban(&self, user_id: u64) -> Result<bool, StorageError> {
        let existed = self.store.delete(&Self::key(user_id)).await?;
        if existed {
            info!(user_id, "user unbanned");
        }
        Ok(existed)
    }

    // ─────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────

    /// Current ban record, deleting it first if it has expired.
    pub async fn ban_info(&self, user_id: u64) -> Result<Option<BanRecord>, BanError> {
        self.ban_info_at(user_id, Utc::now()).await
    }

    pub async fn ban_info_at(&self, user_id: u64, now: DateTime<Utc>) -> Result<Option<BanRecord>, BanError> {
        let key = Self::key(user_id);
        let Some(bytes) = self.store.load(&key).await? else {
            return Ok(None);
        };
        let record: BanRecord =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::serialization(&key, e))?;

        if record.is_expired_at(now)? {
            self.store.delete(&key).await?;
            info!(user_id, "ban expired and was removed");
            return Ok(None);
        }
        Ok(Some(record))
    }

    pub async fn is_banned(&self, user_id: u64) -> Result<BanStatus, BanError> {
        self.is_banned_at(user_id, Utc::now()).await
    }

    pub async fn is_banned_at(&self, user_id: u64, now: DateTime<Utc>) -> Result<BanStatus, BanError> {
        Ok(match self.ban_info_at(user_id, now).await? {
            Some(record) => {
                let message = record.message()?;
                BanStatus::Banned { record, message }
            }
            None => BanStatus::NotBanned,
        })
    }

    /// Gate an interaction. Lookup failures block with [`VERIFY_FAILED_MESSAGE`].
    pub async fn check_ban(&self, user_id: u64) -> BanCheck {
        match self.is_banned(user_id).await {
            Ok(BanStatus::NotBanned) => BanCheck::Allowed,
            Ok(BanStatus::Banned { message, .. }) => BanCheck::Blocked(message),
            Err(e) => {
                error!(user_id, error = %e, "ban check failed");
                BanCheck::Blocked(VERIFY_FAILED_MESSAGE.to_string())
            }
        }
    }

    /// All active bans. Only the configured admin may call this.
    pub async fn list_banned(&self, requester: u64) -> Result<Vec<BanRecord>, BanError> {
        self.list_banned_at(requester, Utc::now()).await
    }

    pub async fn list_banned_at(&self, requester: u64, now: DateTime<Utc>) -> Result<Vec<BanRecord>, BanError> {
        if !self.is_admin(requester) {
            warn!(requester, "unauthorized ban list request");
            return Err(BanError::Unauthorized);
        }

        let mut active = Vec::new();
        for key in self.store.keys().await? {
            let Some(user_id) = Self::user_from_key(&key) else {
                continue;
            };
            match self.ban_info_at(user_id, now).await {
                Ok(Some(record)) => active.push(record),
                Ok(None) => {}
                Err(e) => warn!(user_id, error = %e, "skipping unreadable ban record"),
            }
        }
        active.sort_by_key(|r| r.timestamp);
        Ok(active)
    }

    /// Delete every expired ban. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
        self.cleanup_expired_at(Utc::now()).await
    }

    pub async fn cleanup_expired_at(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut removed = 0;
        for key in self.store.keys().await? {
            let Some(bytes) = self.store.load(&key).await? else {
                continue;
            };
            let record: BanRecord = match serde_json::from_slice(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping unreadable ban record");
                    continue;
                }
            };
            match record.is_expired_at(now) {
                Ok(true) => {
                    if self.store.delete(&key).await? {
                        removed += 1;
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(key = %key, error = %e, "skipping ban with unreadable term"),
            }
        }
        if removed > 0 {
            info!(removed, "removed expired bans");
        } else {
            debug!("no expired bans");
        }
        Ok(removed)
    }

    // ─────────────────────────────────────────
    // Background sweep
    // ─────────────────────────────────────────

    /// Start the periodic sweep. No-op if already running.
    pub async fn start(self: &Arc<Self>) {
        let mut cleanup = self.cleanup.lock().await;
        if cleanup.as_ref().is_some_and(|c| !c.handle.is_finished()) {
            debug!("ban cleanup already running");
            return;
        }

        let shutdown = Arc::new(Notify::new());
        let registry = Arc::clone(self);
        let signal = Arc::clone(&shutdown);
        let handle = tokio::spawn(async move { registry.run_cleanup(signal).await });

        info!(interval_s = self.cleanup_interval.as_secs(), "ban cleanup started");
        *cleanup = Some(Cleanup { shutdown, handle });
    }

    /// Stop the periodic sweep and wait for it to exit. No-op if not running.
    pub async fn stop(&self) {
        let Some(cleanup) = self.cleanup.lock().await.take() else {
            return;
        };
        info!("stopping ban cleanup");
        cleanup.shutdown.notify_one();
        if let Err(e) = cleanup.handle.await {
            error!(error = %e, "ban cleanup task failed");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.cleanup
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| !c.handle.is_finished())
    }

    async fn run_cleanup(&self, shutdown: Arc<Notify>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.cleanup_interval) => {
                    if let Err(e) = self.cleanup_expired().await {
                        error!(error = %e, "ban cleanup sweep failed");
                    }
                }
                _ = shutdown.notified() => {
                    info!("ban cleanup shutting down");
                    return;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
