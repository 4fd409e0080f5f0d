//! Reminder scheduler: min-heap keyed by fire time, one async timer.
//!
//! Architecture:
//! - Every stored reminder is loaded into the heap at start
//! - The loop sleeps until the earliest fire time, or until a new reminder
//!   re-arms it, or until shutdown
//! - Due reminders are popped and sent through a [`Notifier`]
//! - A failed delivery is pushed back at `now + retry_delay` and the stored
//!   fire time is updated to match

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chatcord_core::config::RemindersConfig;
use chatcord_core::storage::StorageError;

use crate::store::ReminderStore;
use crate::types::{on_time_message, overdue_message, validate_fire_time, ReminderError, ReminderRecord};

// ─────────────────────────────────────────────
// Notifier
// ─────────────────────────────────────────────

/// Sends a direct message to a user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_user(&self, user_id: u64, text: &str) -> anyhow::Result<()>;
}

// ─────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub retry_delay: Duration,
    /// Later than this past the fire time ⇒ overdue wording.
    pub overdue_threshold: Duration,
    /// Drop a reminder after this many failed deliveries; `None` retries forever.
    pub max_attempts: Option<u32>,
    pub max_ahead_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&RemindersConfig::default())
    }
}

impl From<&RemindersConfig> for SchedulerConfig {
    fn from(cfg: &RemindersConfig) -> Self {
        Self {
            retry_delay: Duration::from_secs(cfg.retry_delay_secs),
            overdue_threshold: Duration::from_secs(cfg.overdue_threshold_secs),
            max_attempts: (cfg.max_delivery_attempts > 0).then_some(cfg.max_delivery_attempts),
            max_ahead_days: cfg.max_ahead_days,
        }
    }
}

// ─────────────────────────────────────────────
// Heap entry
// ─────────────────────────────────────────────

/// One pending delivery. Ordered by fire time, then insertion sequence.
#[derive(Clone, Debug)]
pub struct ScheduledReminder {
    pub fire_at: DateTime<Utc>,
    pub user_id: u64,
    pub reminder_id: String,
    pub message: String,
    /// Failed deliveries so far.
    pub attempts: u32,
    seq: u64,
}

impl PartialEq for ScheduledReminder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledReminder {}

impl PartialOrd for ScheduledReminder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledReminder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.seq.cmp(&other.seq))
    }
}

// ─────────────────────────────────────────────
// ReminderScheduler
// ─────────────────────────────────────────────

struct Running {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Delivers reminders at their fire time.
pub struct ReminderScheduler {
    store: Arc<ReminderStore>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
    heap: Mutex<BinaryHeap<Reverse<ScheduledReminder>>>,
    seq: AtomicU64,
    /// Re-arm signal (when reminders are added).
    rearm: Notify,
    running: Mutex<Option<Running>>,
}

impl ReminderScheduler {
    pub fn new(store: Arc<ReminderStore>, notifier: Arc<dyn Notifier>, config: SchedulerConfig) -> Self {
        Self {
            store,
            notifier,
            config,
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            rearm: Notify::new(),
            running: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<ReminderStore> {
        &self.store
    }

    fn entry(&self, user_id: u64, reminder_id: String, message: String, fire_at: DateTime<Utc>, attempts: u32) -> ScheduledReminder {
        ScheduledReminder {
            fire_at,
            user_id,
            reminder_id,
            message,
            attempts,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
        }
    }

    // ─────────────────────────────────────────
    // Heap management
    // ─────────────────────────────────────────

    /// Replace the heap with every stored reminder. Returns how many were loaded.
    pub async fn load_all_reminders(&self) -> Result<usize, StorageError> {
        let all = self.store.all().await?;
        let mut heap = self.heap.lock().await;
        heap.clear();
        for (user_id, r) in all {
            heap.push(Reverse(self.entry(user_id, r.id, r.message, r.time, 0)));
        }
        info!(count = heap.len(), "reminders loaded");
        Ok(heap.len())
    }

    /// Queue a reminder and wake the loop so it re-evaluates its sleep.
    pub async fn add_reminder(&self, user_id: u64, reminder_id: &str, message: &str, time: DateTime<Utc>) {
        let entry = self.entry(user_id, reminder_id.to_string(), message.to_string(), time, 0);
        self.heap.lock().await.push(Reverse(entry));
        self.rearm.notify_one();
        debug!(user_id, id = %reminder_id, time = %time, "reminder queued");
    }

    /// Drop queued entries for a reminder. Returns whether any were removed.
    pub async fn remove_reminder(&self, user_id: u64, reminder_id: &str) -> bool {
        let mut heap = self.heap.lock().await;
        let before = heap.len();
        heap.retain(|Reverse(e)| !(e.user_id == user_id && e.reminder_id == reminder_id));
        let removed = heap.len() != before;
        if removed {
            self.rearm.notify_one();
        }
        removed
    }

    /// Validate, persist and queue a user-created reminder.
    pub async fn schedule(
        &self,
        user_id: u64,
        message: &str,
        time: DateTime<Utc>,
        utc_offset_minutes: Option<i32>,
    ) -> Result<ReminderRecord, ReminderError> {
        validate_fire_time(time, Utc::now(), self.config.max_ahead_days)?;
        let record = self.store.add(user_id, message, time, utc_offset_minutes).await?;
        self.add_reminder(user_id, &record.id, &record.message, record.time).await;
        Ok(record)
    }

    /// Delete the `index`-th (1-based, by fire time) reminder of a user.
    pub async fn delete_by_index(&self, user_id: u64, index: usize) -> Result<ReminderRecord, ReminderError> {
        let list = self.store.list(user_id).await?;
        let record = index
            .checked_sub(1)
            .and_then(|i| list.get(i))
            .cloned()
            .ok_or(ReminderError::NotFound)?;
        self.store.remove(user_id, &record.id).await?;
        self.remove_reminder(user_id, &record.id).await;
        info!(user_id, id = %record.id, "reminder deleted");
        Ok(record)
    }

    /// Snapshot of queued entries, earliest first.
    pub async fn pending(&self) -> Vec<ScheduledReminder> {
        let heap = self.heap.lock().await;
        let mut entries: Vec<ScheduledReminder> = heap.iter().map(|Reverse(e)| e.clone()).collect();
        entries.sort();
        entries
    }

    async fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.heap.lock().await.peek().map(|Reverse(e)| e.fire_at)
    }

    // ─────────────────────────────────────────
    // Delivery
    // ─────────────────────────────────────────

    /// Deliver every entry due at `now`, earliest first. Returns how many were popped.
    pub async fn deliver_due_at(&self, now: DateTime<Utc>) -> usize {
        // Pop under the lock, deliver without it
        let due: Vec<ScheduledReminder> = {
            let mut heap = self.heap.lock().await;
            let mut due = Vec::new();
            while heap.peek().is_some_and(|Reverse(e)| e.fire_at <= now) {
                if let Some(Reverse(entry)) = heap.pop() {
                    due.push(entry);
                }
            }
            due
        };

        let count = due.len();
        for entry in due {
            self.deliver(entry, now).await;
        }
        count
    }

    async fn deliver(&self, entry: ScheduledReminder, now: DateTime<Utc>) {
        let delay = (now - entry.fire_at).to_std().unwrap_or_default();
        let overdue = delay > self.config.overdue_threshold;
        let text = if overdue {
            overdue_message(&entry.message)
        } else {
            on_time_message(&entry.message)
        };

        match self.notifier.notify_user(entry.user_id, &text).await {
            Ok(()) => {
                info!(
                    user_id = entry.user_id,
                    id = %entry.reminder_id,
                    overdue,
                    delay_s = delay.as_secs(),
                    "reminder delivered"
                );
                if let Err(e) = self.store.remove(entry.user_id, &entry.reminder_id).await {
                    error!(user_id = entry.user_id, id = %entry.reminder_id, error = %e, "failed to remove delivered reminder");
                }
            }
            Err(e) => self.retry_later(entry, e).await,
        }
    }

    async fn retry_later(&self, mut entry: ScheduledReminder, cause: anyhow::Error) {
        entry.attempts += 1;

        if self.config.max_attempts.is_some_and(|max| entry.attempts >= max) {
            error!(
                user_id = entry.user_id,
                id = %entry.reminder_id,
                attempts = entry.attempts,
                error = %cause,
                "reminder delivery failed permanently, dropping"
            );
            if let Err(e) = self.store.remove(entry.user_id, &entry.reminder_id).await {
                error!(user_id = entry.user_id, error = %e, "failed to drop reminder");
            }
            return;
        }

        let retry_delay = chrono::Duration::from_std(self.config.retry_delay)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let retry_at = Utc::now() + retry_delay;
        warn!(
            user_id = entry.user_id,
            id = %entry.reminder_id,
            attempts = entry.attempts,
            retry_at = %retry_at,
            error = %cause,
            "reminder delivery failed, will retry"
        );

        match self.store.reschedule(entry.user_id, &entry.reminder_id, retry_at).await {
            Ok(true) => {}
            Ok(false) => {
                // Deleted by the user while we were delivering
                debug!(id = %entry.reminder_id, "reminder no longer stored, not retrying");
                return;
            }
            Err(e) => error!(user_id = entry.user_id, error = %e, "failed to persist retry time"),
        }

        let retry = self.entry(entry.user_id, entry.reminder_id, entry.message, retry_at, entry.attempts);
        self.heap.lock().await.push(Reverse(retry));
    }

    // ─────────────────────────────────────────
    // Timer loop
    // ─────────────────────────────────────────

    async fn run(&self, shutdown: Arc<Notify>) {
        info!("reminder scheduler started");
        loop {
            let wait = self
                .next_fire_time()
                .await
                .map(|at| (at - Utc::now()).to_std().unwrap_or_default());

            match wait {
                Some(wait) => {
                    debug!(sleep_ms = wait.as_millis() as u64, "reminder timer armed");
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {
                            self.deliver_due_at(Utc::now()).await;
                        }
                        _ = self.rearm.notified() => {
                            debug!("reminder timer re-armed");
                        }
                        _ = shutdown.notified() => break,
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.rearm.notified() => {
                            debug!("reminder timer re-armed");
                        }
                        _ = shutdown.notified() => break,
                    }
                }
            }
        }
        info!("reminder scheduler shutting down");
    }

    /// Load every stored reminder, then start the timer loop.
    /// No-op if already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), StorageError> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("reminder scheduler already running");
            return Ok(());
        }

        self.load_all_reminders().await?;

        let shutdown = Arc::new(Notify::new());
        let scheduler = Arc::clone(self);
        let signal = Arc::clone(&shutdown);
        let handle = tokio::spawn(async move { scheduler.run(signal).await });
        *running = Some(Running { shutdown, handle });
        Ok(())
    }

    /// Stop the loop and wait for it to exit. No-op if not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        info!("stopping reminder scheduler");
        running.shutdown.notify_one();
        if let Err(e) = running.handle.await {
            error!(error = %e, "reminder scheduler task failed");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chatcord_core::storage::{KeyValueStore, MemoryStore};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    /// Records deliveries; fails the first `fail_first` calls.
    #[derive(Default)]
    struct Recorder {
        sent: StdMutex<Vec<(u64, String)>>,
        fail_first: usize,
        calls: AtomicUsize,
    }

    impl Recorder {
        fn failing(n: usize) -> Self {
            Self {
                fail_first: n,
                ..Default::default()
            }
        }

        fn sent(&self) -> Vec<(u64, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify_user(&self, user_id: u64, text: &str) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("user unreachable");
            }
            self.sent.lock().unwrap().push((user_id, text.to_string()));
            Ok(())
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            retry_delay: Duration::from_millis(50),
            overdue_threshold: Duration::from_secs(180),
            max_attempts: None,
            max_ahead_days: 365,
        }
    }

    fn make_scheduler(notifier: Arc<Recorder>, config: SchedulerConfig) -> Arc<ReminderScheduler> {
        let store = Arc::new(ReminderStore::new(Arc::new(MemoryStore::new())));
        Arc::new(ReminderScheduler::new(store, notifier, config))
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-02-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_delivers_in_fire_time_order() {
        let notifier = Arc::new(Recorder::default());
        let scheduler = make_scheduler(notifier.clone(), fast_config());

        for (secs, msg) in [(10, "ten"), (5, "five"), (20, "twenty")] {
            let r = scheduler
                .store()
                .add(1, msg, t0() + chrono::Duration::seconds(secs), None)
                .await
                .unwrap();
            scheduler.add_reminder(1, &r.id, msg, r.time).await;
        }

        assert_eq!(scheduler.deliver_due_at(t0() + chrono::Duration::seconds(7)).await, 1);
        assert_eq!(scheduler.deliver_due_at(t0() + chrono::Duration::seconds(30)).await, 2);

        let sent: Vec<String> = notifier.sent().into_iter().map(|(_, t)| t).collect();
        assert!(sent[0].ends_with("five"));
        assert!(sent[1].ends_with("ten"));
        assert!(sent[2].ends_with("twenty"));
        assert!(scheduler.store().load(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overdue_wording() {
        let notifier = Arc::new(Recorder::default());
        let scheduler = make_scheduler(notifier.clone(), fast_config());
        scheduler.add_reminder(1, "a", "late one", t0()).await;
        scheduler.add_reminder(1, "b", "prompt one", t0() + chrono::Duration::minutes(9)).await;

        scheduler.deliver_due_at(t0() + chrono::Duration::minutes(10)).await;
        let sent = notifier.sent();
        assert!(sent[0].1.contains("could not remind you on time"));
        assert!(sent[1].1.contains(":alarm_clock:"));
    }

    #[tokio::test]
    async fn test_failed_delivery_is_rescheduled() {
        let notifier = Arc::new(Recorder::failing(1));
        let scheduler = make_scheduler(notifier.clone(), fast_config());
        let fire = Utc::now() - chrono::Duration::seconds(1);
        let r = scheduler.store().add(3, "retry me", fire, None).await.unwrap();
        scheduler.add_reminder(3, &r.id, &r.message, r.time).await;

        let before = Utc::now();
        scheduler.deliver_due_at(Utc::now()).await;

        let stored = scheduler.store().get(3, &r.id).await.unwrap().unwrap();
        assert!(stored.time >= before + chrono::Duration::milliseconds(50));
        assert!(stored.time <= Utc::now() + chrono::Duration::milliseconds(50));
        let pending = scheduler.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].fire_at, stored.time);
    }

    #[tokio::test]
    async fn test_retry_eventually_delivers_via_loop() {
        let notifier = Arc::new(Recorder::failing(1));
        let scheduler = make_scheduler(notifier.clone(), fast_config());
        scheduler
            .store()
            .add(4, "eventually", Utc::now() - chrono::Duration::seconds(1), None)
            .await
            .unwrap();

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        scheduler.stop().await;

        assert_eq!(notifier.sent().len(), 1);
        assert!(notifier.sent()[0].1.ends_with("eventually"));
        assert!(scheduler.store().load(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_after_max_attempts() {
        let notifier = Arc::new(Recorder::failing(usize::MAX));
        let config = SchedulerConfig {
            max_attempts: Some(2),
            ..fast_config()
        };
        let scheduler = make_scheduler(notifier.clone(), config);
        let r = scheduler.store().add(5, "never", t0(), None).await.unwrap();
        scheduler.add_reminder(5, &r.id, "never", t0()).await;

        scheduler.deliver_due_at(t0()).await;
        assert_eq!(scheduler.pending().await.len(), 1);

        scheduler.deliver_due_at(Utc::now() + chrono::Duration::seconds(1)).await;
        assert!(scheduler.pending().await.is_empty());
        assert!(scheduler.store().load(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_wakes_sleeping_loop() {
        let notifier = Arc::new(Recorder::default());
        let scheduler = make_scheduler(notifier.clone(), fast_config());
        // Far-future entry keeps the loop sleeping for an hour
        let far = scheduler
            .store()
            .add(1, "far", Utc::now() + chrono::Duration::hours(1), None)
            .await
            .unwrap();
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.pending().await.len(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        scheduler
            .add_reminder(1, "near", "near", Utc::now() + chrono::Duration::milliseconds(30))
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.stop().await;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.ends_with("near"));

        let pending = scheduler.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reminder_id, far.id);
    }

    /// Yields inside every load so concurrent edits interleave.
    struct SlowStore(MemoryStore);

    #[async_trait]
    impl KeyValueStore for SlowStore {
        async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            let bytes = self.0.load(key).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            bytes
        }
        async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
            self.0.save(key, bytes).await
        }
        async fn delete(&self, key: &str) -> Result<bool, StorageError> {
            self.0.delete(key).await
        }
        async fn keys(&self) -> Result<Vec<String>, StorageError> {
            self.0.keys().await
        }
    }

    #[tokio::test]
    async fn test_delivery_during_schedule_keeps_new_reminder() {
        let notifier = Arc::new(Recorder::default());
        let store = Arc::new(ReminderStore::new(Arc::new(SlowStore(MemoryStore::new()))));
        let scheduler = Arc::new(ReminderScheduler::new(store, notifier.clone(), fast_config()));

        let due = scheduler
            .store()
            .add(1, "due", Utc::now() - chrono::Duration::seconds(1), None)
            .await
            .unwrap();
        scheduler.add_reminder(1, &due.id, &due.message, due.time).await;

        let delivery = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.deliver_due_at(Utc::now()).await })
        };
        let fresh = scheduler
            .schedule(1, "new one", Utc::now() + chrono::Duration::hours(1), None)
            .await
            .unwrap();
        assert_eq!(delivery.await.unwrap(), 1);

        assert_eq!(scheduler.store().load(1).await.unwrap(), vec![fresh]);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_start_loads_store_and_is_idempotent() {
        let notifier = Arc::new(Recorder::default());
        let scheduler = make_scheduler(notifier, fast_config());
        scheduler
            .store()
            .add(9, "later", Utc::now() + chrono::Duration::hours(2), None)
            .await
            .unwrap();

        scheduler.start().await.unwrap();
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);
        assert_eq!(scheduler.pending().await.len(), 1);

        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_schedule_validates_and_deletes_by_index() {
        let scheduler = make_scheduler(Arc::new(Recorder::default()), fast_config());
        assert!(matches!(
            scheduler.schedule(1, "past", Utc::now() - chrono::Duration::minutes(1), None).await,
            Err(ReminderError::PastTime(_))
        ));

        scheduler.schedule(1, "b", Utc::now() + chrono::Duration::hours(2), None).await.unwrap();
        scheduler.schedule(1, "a", Utc::now() + chrono::Duration::hours(1), None).await.unwrap();

        let removed = scheduler.delete_by_index(1, 1).await.unwrap();
        assert_eq!(removed.message, "a");
        assert!(matches!(scheduler.delete_by_index(1, 5).await, Err(ReminderError::NotFound)));
        assert!(matches!(scheduler.delete_by_index(1, 0).await, Err(ReminderError::NotFound)));
        assert_eq!(scheduler.pending().await.len(), 1);
    }
}
