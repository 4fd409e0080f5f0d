//! In-memory session cache with sliding and absolute expiry.
//!
//! An entry is visible only while both hold:
//! - `now - load_time <= absolute_ttl`
//! - `now - last_access <= sliding_ttl`
//!
//! A hit refreshes `last_access` but never `load_time`, so even a busy
//! session is re-read from storage once the absolute TTL runs out.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::types::{SessionRecord, SessionScope};

/// Default sliding TTL: 1 hour.
pub const DEFAULT_SLIDING_TTL_S: i64 = 60 * 60;

/// Default absolute TTL: 24 hours.
pub const DEFAULT_ABSOLUTE_TTL_S: i64 = 24 * 60 * 60;

/// A cached record plus its timestamps.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub record: SessionRecord,
    pub load_time: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

impl CacheEntry {
    fn new(record: SessionRecord, now: DateTime<Utc>) -> Self {
        Self {
            record,
            load_time: now,
            last_access: now,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>, sliding_ttl: Duration, absolute_ttl: Duration) -> bool {
        now - self.load_time > absolute_ttl || now - self.last_access > sliding_ttl
    }
}

/// Session records keyed by scope.
pub struct SessionCache {
    entries: Mutex<HashMap<SessionScope, CacheEntry>>,
    sliding_ttl: Duration,
    absolute_ttl: Duration,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(
            Duration::seconds(DEFAULT_SLIDING_TTL_S),
            Duration::seconds(DEFAULT_ABSOLUTE_TTL_S),
        )
    }
}

impl SessionCache {
    pub fn new(sliding_ttl: Duration, absolute_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            sliding_ttl,
            absolute_ttl,
        }
    }

    /// Look up a record, evicting it if either TTL has elapsed.
    pub fn get(&self, scope: SessionScope) -> Option<SessionRecord> {
        self.get_at(scope, Utc::now())
    }

    /// [`get`](Self::get) evaluated at an explicit instant.
    pub fn get_at(&self, scope: SessionScope, now: DateTime<Utc>) -> Option<SessionRecord> {
        let mut entries = self.lock();
        let expired = match entries.get(&scope) {
            None => return None,
            Some(entry) => entry.is_expired(now, self.sliding_ttl, self.absolute_ttl),
        };

        if expired {
            entries.remove(&scope);
            debug!(scope = %scope, "evicted expired session from cache");
            return None;
        }

        entries.get_mut(&scope).map(|entry| {
            entry.last_access = now;
            entry.record.clone()
        })
    }

    /// Insert or overwrite a record; both timestamps restart.
    pub fn set(&self, scope: SessionScope, record: SessionRecord) {
        self.set_at(scope, record, Utc::now());
    }

    pub fn set_at(&self, scope: SessionScope, record: SessionRecord, now: DateTime<Utc>) {
        self.lock().insert(scope, CacheEntry::new(record, now));
    }

    /// Drop a single entry.
    pub fn invalidate(&self, scope: SessionScope) {
        self.lock().remove(&scope);
    }

    /// Sweep every expired entry. Returns how many were evicted.
    pub fn clear_expired(&self) -> usize {
        self.clear_expired_at(Utc::now())
    }

    pub fn clear_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now, self.sliding_ttl, self.absolute_ttl));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "swept expired sessions from cache");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionScope, CacheEntry>> {
        // A panic while holding the lock cannot leave an entry half-written
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn record(model: &str) -> SessionRecord {
        SessionRecord::new(model)
    }

    #[test]
    fn test_miss_on_empty() {
        let cache = SessionCache::default();
        assert!(cache.get_at(SessionScope::Direct(1), t0()).is_none());
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = SessionCache::default();
        cache.set_at(SessionScope::Direct(1), record("gpt-4o"), t0());
        let hit = cache.get_at(SessionScope::Direct(1), t0() + Duration::minutes(30));
        assert_eq!(hit.unwrap().model, "gpt-4o");
    }

    #[test]
    fn test_sliding_expiry() {
        let cache = SessionCache::default();
        cache.set_at(SessionScope::Direct(1), record("gpt-4o"), t0());
        assert!(cache.get_at(SessionScope::Direct(1), t0()).is_some());

        let later = t0() + Duration::seconds(DEFAULT_SLIDING_TTL_S + 1);
        assert!(cache.get_at(SessionScope::Direct(1), later).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_access_refreshes_sliding_window() {
        let cache = SessionCache::default();
        cache.set_at(SessionScope::Direct(1), record("gpt-4o"), t0());

        let mut now = t0();
        for _ in 0..3 {
            now += Duration::minutes(50);
            assert!(cache.get_at(SessionScope::Direct(1), now).is_some());
        }
    }

    #[test]
    fn test_absolute_expiry_despite_activity() {
        let cache = SessionCache::default();
        cache.set_at(SessionScope::Direct(1), record("gpt-4o"), t0());

        // Touch every 30 minutes for 24 hours: sliding alone would keep it alive
        let mut now = t0();
        while now - t0() <= Duration::seconds(DEFAULT_ABSOLUTE_TTL_S) {
            assert!(cache.get_at(SessionScope::Direct(1), now).is_some());
            now += Duration::minutes(30);
        }
        assert!(cache.get_at(SessionScope::Direct(1), now).is_none());
    }

    #[test]
    fn test_set_restarts_load_time() {
        let cache = SessionCache::default();
        cache.set_at(SessionScope::Direct(1), record("a"), t0());
        let refreshed = t0() + Duration::hours(23) + Duration::minutes(30);
        cache.set_at(SessionScope::Direct(1), record("b"), refreshed);

        let hit = cache.get_at(SessionScope::Direct(1), t0() + Duration::hours(24) + Duration::minutes(10));
        assert_eq!(hit.unwrap().model, "b");
    }

    #[test]
    fn test_scopes_are_independent() {
        let cache = SessionCache::default();
        cache.set_at(SessionScope::Direct(5), record("dm"), t0());
        assert!(cache.get_at(SessionScope::Channel(5), t0()).is_none());
        assert!(cache.get_at(SessionScope::System, t0()).is_none());
    }

    #[test]
    fn test_clear_expired() {
        let cache = SessionCache::default();
        cache.set_at(SessionScope::Direct(1), record("old"), t0());
        cache.set_at(SessionScope::Direct(2), record("new"), t0() + Duration::minutes(90));

        let evicted = cache.clear_expired_at(t0() + Duration::minutes(100));
        assert_eq!(evicted, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache
            .get_at(SessionScope::Direct(2), t0() + Duration::minutes(100))
            .is_some());
    }

    #[test]
    fn test_custom_ttls() {
        let cache = SessionCache::new(Duration::seconds(10), Duration::seconds(15));
        cache.set_at(SessionScope::Direct(1), record("x"), t0());
        assert!(cache.get_at(SessionScope::Direct(1), t0() + Duration::seconds(8)).is_some());
        assert!(cache.get_at(SessionScope::Direct(1), t0() + Duration::seconds(16)).is_none());
    }

    #[test]
    fn test_invalidate() {
        let cache = SessionCache::default();
        cache.set_at(SessionScope::Direct(1), record("x"), t0());
        cache.invalidate(SessionScope::Direct(1));
        assert!(cache.get_at(SessionScope::Direct(1), t0()).is_none());
    }
}
