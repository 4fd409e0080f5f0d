//! Config loader: reads `~/.chatcord/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.chatcord/config.json`
//! 3. Legacy bare env vars (`MODEL`, `MAX_HISTORY_LENGTH`, `ADMIN_ID`, ...)
//! 4. Environment variables `CHATCORD_<SECTION>__<FIELD>`

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, warn};

use super::schema::{Config, ProviderConfig};

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    let config = read_config_file(&config_path);
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

/// Read the JSON file, or defaults on any failure.
fn read_config_file(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return Config::default();
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return Config::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            Config::default()
        }
    }
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment overrides on top of a loaded config.
///
/// `lookup` resolves a variable name to its value.
///
/// Supported overrides:
/// - `MODEL` / `CHATCORD_BOT__DEFAULT_MODEL` → `bot.default_model`
/// - `MAX_HISTORY_LENGTH` / `CHATCORD_BOT__MAX_HISTORY_LENGTH`
/// - `DISCORD_CHANNEL_ID` / `CHATCORD_BOT__SYSTEM_CHANNEL_ID`
/// - `BOT_NAME`, `VERSION_BOT`, `APPLY_INSTRUCTION_TO_ALL`
/// - `CACHE_ENABLED`, `ENCRYPT_USER_DATA`, `ENCRYPT_CHANNELS` / `CHATCORD_STORAGE__*`
/// - `ADMIN_ID` / `CHATCORD_BANS__ADMIN_ID`
/// - `BRAVE_API_KEY` / `CHATCORD_SEARCH__BRAVE_API_KEY`
/// - `CHATCORD_PROVIDERS__<NAME>__API_KEY` / `__API_BASE`
fn apply_env_overrides<F>(mut config: Config, lookup: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    let var = |legacy: &str, scoped: &str| lookup(scoped).or_else(|| lookup(legacy));

    // Bot
    if let Some(val) = var("MODEL", "CHATCORD_BOT__DEFAULT_MODEL") {
        config.bot.default_model = val;
    }
    set_parsed(&mut config.bot.max_history_length, var("MAX_HISTORY_LENGTH", "CHATCORD_BOT__MAX_HISTORY_LENGTH"));
    if let Some(val) = var("DISCORD_CHANNEL_ID", "CHATCORD_BOT__SYSTEM_CHANNEL_ID") {
        match val.parse::<u64>() {
            Ok(id) => config.bot.system_channel_id = Some(id),
            Err(_) => warn!(value = %val, "ignoring non-numeric system channel id"),
        }
    }
    if let Some(val) = var("BOT_NAME", "CHATCORD_BOT__NAME") {
        config.bot.name = val;
    }
    if let Some(val) = var("VERSION_BOT", "CHATCORD_BOT__VERSION") {
        config.bot.version = val;
    }
    set_flag(&mut config.bot.apply_instruction_to_all, var("APPLY_INSTRUCTION_TO_ALL", "CHATCORD_BOT__APPLY_INSTRUCTION_TO_ALL"));
    set_flag(&mut config.bot.turn_lock, lookup("CHATCORD_BOT__TURN_LOCK"));

    // Storage
    if let Some(val) = lookup("CHATCORD_STORAGE__DATA_DIR") {
        config.storage.data_dir = val;
    }
    set_flag(&mut config.storage.cache_enabled, var("CACHE_ENABLED", "CHATCORD_STORAGE__CACHE_ENABLED"));
    set_flag(&mut config.storage.encrypt_user_data, var("ENCRYPT_USER_DATA", "CHATCORD_STORAGE__ENCRYPT_USER_DATA"));
    set_flag(&mut config.storage.encrypt_channels, var("ENCRYPT_CHANNELS", "CHATCORD_STORAGE__ENCRYPT_CHANNELS"));

    // Failover / reminders / bans
    set_parsed(&mut config.failover.deadline_secs, lookup("CHATCORD_FAILOVER__DEADLINE_SECS"));
    set_parsed(&mut config.reminders.retry_delay_secs, lookup("CHATCORD_REMINDERS__RETRY_DELAY_SECS"));
    set_parsed(&mut config.reminders.max_delivery_attempts, lookup("CHATCORD_REMINDERS__MAX_DELIVERY_ATTEMPTS"));
    set_parsed(&mut config.bans.admin_id, var("ADMIN_ID", "CHATCORD_BANS__ADMIN_ID"));

    // Search
    if let Some(val) = var("BRAVE_API_KEY", "CHATCORD_SEARCH__BRAVE_API_KEY") {
        config.search.brave_api_key = val;
    }

    // Provider credentials for every name already configured or conventionally known
    let mut names: Vec<String> = config.providers.keys().cloned().collect();
    for known in KNOWN_PROVIDERS {
        if !names.iter().any(|n| n == known) {
            names.push((*known).to_string());
        }
    }
    for name in names {
        let upper = name.to_uppercase();
        let api_key = lookup(&format!("CHATCORD_PROVIDERS__{upper}__API_KEY"));
        let api_base = lookup(&format!("CHATCORD_PROVIDERS__{upper}__API_BASE"));
        if api_key.is_none() && api_base.is_none() {
            continue;
        }
        let entry = config
            .providers
            .entry(name)
            .or_insert_with(ProviderConfig::default);
        if let Some(key) = api_key {
            entry.api_key = key;
        }
        if api_base.is_some() {
            entry.api_base = api_base;
        }
    }

    config
}

/// Provider names probed for `CHATCORD_PROVIDERS__<NAME>__*` even when absent from the file.
const KNOWN_PROVIDERS: &[&str] = &["groq", "openai", "perplexity", "deepinfra", "huggingface", "pollinations"];

fn set_parsed<T: FromStr>(slot: &mut T, value: Option<String>) {
    if let Some(val) = value {
        match val.parse::<T>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(value = %val, "ignoring unparseable config override"),
        }
    }
}

fn set_flag(slot: &mut bool, value: Option<String>) {
    if let Some(val) = value {
        *slot = matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on");
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
