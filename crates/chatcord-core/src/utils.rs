//! Utility helpers: path resolution, filenames, string truncation.

use std::path::PathBuf;

/// Get the default chatcord data directory (e.g. `~/.chatcord/`).
pub fn get_data_path() -> PathBuf {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".chatcord")
}

/// Session records live here.
pub fn sessions_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("user_data")
}

/// Per-user reminder lists live here.
pub fn reminders_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("reminders")
}

/// Ban records live here.
pub fn bans_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("bans")
}

/// Per-scope encryption keys live here.
pub fn keys_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("keys")
}

/// Truncate a string to `max_len` characters, adding "..." if truncated.
/// Unicode-safe.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

/// Sanitize a string for use as a filename.
pub fn safe_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("USERPROFILE").ok().map(PathBuf::from))
}

/// Serde adapter for ISO-8601 timestamps.
///
/// Writes RFC 3339. Reads RFC 3339 or a naive `YYYY-MM-DDTHH:MM:SS[.f]`,
/// which is taken as UTC.
pub mod iso8601 {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// Parse either form.
    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
    }
}
