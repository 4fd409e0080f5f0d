//! Reminder types: the persisted record, validation, and display helpers.
//!
//! On disk each user has one JSON array:
//! `[{"id": "...", "message": "...", "time": "ISO-8601", "utc_offset_minutes": 180}]`.
//! `time` is always UTC; `utc_offset_minutes` only affects how it is shown.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use chatcord_core::storage::StorageError;

// ─────────────────────────────────────────────
// ReminderRecord
// ─────────────────────────────────────────────

/// One reminder owned by one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRecord {
    /// Unique per user, derived from the creation time.
    pub id: String,
    pub message: String,
    #[serde(with = "chatcord_core::utils::iso8601")]
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
}

impl ReminderRecord {
    /// Fire time in the creator's offset (UTC if none).
    pub fn local_time(&self) -> DateTime<FixedOffset> {
        let offset = self
            .utc_offset_minutes
            .and_then(|m| m.checked_mul(60))
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        self.time.with_timezone(&offset)
    }
}

// ─────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("reminder time {0} is in the past")]
    PastTime(DateTime<Utc>),

    #[error("reminder time is more than {max_days} days ahead")]
    TooFarAhead { max_days: i64 },

    #[error("invalid local time or UTC offset")]
    InvalidTime,

    #[error("reminder not found")]
    NotFound,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

/// Check that a user-supplied fire time is in the future and not too far ahead.
pub fn validate_fire_time(
    time: DateTime<Utc>,
    now: DateTime<Utc>,
    max_ahead_days: i64,
) -> Result<(), ReminderError> {
    if time <= now {
        return Err(ReminderError::PastTime(time));
    }
    let limit = Duration::try_days(max_ahead_days).and_then(|d| now.checked_add_signed(d));
    if limit.is_some_and(|limit| time > limit) {
        return Err(ReminderError::TooFarAhead {
            max_days: max_ahead_days,
        });
    }
    Ok(())
}

/// Convert a wall-clock time at `offset_minutes` east of UTC into UTC.
pub fn local_to_utc(local: NaiveDateTime, offset_minutes: i32) -> Result<DateTime<Utc>, ReminderError> {
    let offset = offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or(ReminderError::InvalidTime)?;
    offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or(ReminderError::InvalidTime)
}

/// `N. YYYY-MM-DD HH:MM - message`, one line per reminder, numbered from 1.
pub fn format_list(reminders: &[ReminderRecord]) -> String {
    reminders
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. {} - {}",
                i + 1,
                r.local_time().format("%Y-%m-%d %H:%M"),
                r.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text sent for a reminder delivered on time.
pub fn on_time_message(message: &str) -> String {
    format!("> :alarm_clock: **Hi! :wave: You asked me to remind you about:**\n{message}")
}

/// Text sent for a reminder delivered late.
pub fn overdue_message(message: &str) -> String {
    format!(
        "> :warning: **Sorry :persevere:, due to technical problems on our side \
         we could not remind you on time about:**\n> {message}"
    )
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
