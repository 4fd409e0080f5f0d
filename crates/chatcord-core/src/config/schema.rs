//! Configuration schema.
//!
//! Hierarchy: `Config` → `BotConfig`, `StorageConfig`, `providers`, `models`,
//! `FailoverConfig`, `RemindersConfig`, `BansConfig`, `SearchConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration, loaded from `~/.chatcord/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub bot: BotConfig,
    pub storage: StorageConfig,
    /// Credentials and endpoints per provider name (e.g. `"groq"`).
    pub providers: HashMap<String, ProviderConfig>,
    /// Model name → provider names in attempt order. Empty means "use the built-in table".
    pub models: BTreeMap<String, Vec<String>>,
    pub failover: FailoverConfig,
    pub reminders: RemindersConfig,
    pub bans: BansConfig,
    pub search: SearchConfig,
}

impl Config {
    /// Credentials for a provider, if any entry exists.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

// ─────────────────────────────────────────────
// Bot
// ─────────────────────────────────────────────

/// Conversation behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BotConfig {
    /// Display name used in the response header.
    pub name: String,
    /// Version string used in the response header.
    pub version: String,
    /// Model assigned to new sessions.
    pub default_model: String,
    /// Maximum number of turns kept per session.
    pub max_history_length: usize,
    /// Broadcast channel whose session is stored under the `system` key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_channel_id: Option<u64>,
    /// Static instruction file, relative to the data dir unless absolute.
    pub instruction_file: String,
    /// Seed every new session with the static instruction.
    pub apply_instruction_to_all: bool,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Serialise concurrent turns addressed to the same session.
    pub turn_lock: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "Chatcord".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            default_model: "gpt-4o".to_string(),
            max_history_length: 30,
            system_channel_id: None,
            instruction_file: "system_prompt.txt".to_string(),
            apply_instruction_to_all: false,
            max_tokens: 4096,
            temperature: 0.7,
            turn_lock: true,
        }
    }
}

// ─────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────

/// Persistence, caching and encryption-at-rest settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// Root data directory (`~` is expanded).
    pub data_dir: String,
    pub cache_enabled: bool,
    /// Encrypt direct-message sessions.
    pub encrypt_user_data: bool,
    /// Encrypt channel sessions.
    pub encrypt_channels: bool,
    pub sliding_ttl_secs: u64,
    pub absolute_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.chatcord".to_string(),
            cache_enabled: true,
            encrypt_user_data: false,
            encrypt_channels: false,
            sliding_ttl_secs: 60 * 60,
            absolute_ttl_secs: 24 * 60 * 60,
        }
    }
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// Configuration for a single LLM provider (API key, base URL, headers).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Custom API base URL (overrides provider default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Extra HTTP headers to send with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl ProviderConfig {
    /// Whether this provider has a configured API key.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Dispatch limits.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailoverConfig {
    /// Overall deadline across the whole provider list; 0 disables it.
    pub deadline_secs: u64,
}

// ─────────────────────────────────────────────
// Reminders
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemindersConfig {
    /// Delay before a failed delivery is attempted again.
    pub retry_delay_secs: u64,
    /// Deliveries later than this are sent with the apology wording.
    pub overdue_threshold_secs: u64,
    /// Give up after this many failed deliveries; 0 retries forever.
    pub max_delivery_attempts: u32,
    /// How far ahead a reminder may be scheduled.
    pub max_ahead_days: i64,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: 30,
            overdue_threshold_secs: 180,
            max_delivery_attempts: 0,
            max_ahead_days: 365,
        }
    }
}

// ─────────────────────────────────────────────
// Bans
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BansConfig {
    /// The only user allowed to list bans; 0 means nobody.
    pub admin_id: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for BansConfig {
    fn default() -> Self {
        Self {
            admin_id: 0,
            cleanup_interval_secs: 60 * 60,
        }
    }
}

// ─────────────────────────────────────────────
// Search
// ─────────────────────────────────────────────

/// Web search augmentation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchConfig {
    /// Brave Search API key.
    pub brave_api_key: String,
    pub max_results: usize,
    /// Fetch each web hit and extract readable paragraphs.
    pub fetch_pages: bool,
    pub page_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            brave_api_key: String::new(),
            max_results: 5,
            fetch_pages: true,
            page_timeout_secs: 10,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
