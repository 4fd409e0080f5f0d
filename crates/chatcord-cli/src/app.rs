//! Application wiring: builds every service from the loaded config.
//!
//! Construction order:
//! 1. Resolve the data dir and open one `FsStore` per subdirectory
//! 2. Session store (cache + optional AES-GCM cipher)
//! 3. Provider factory → registry → failover dispatcher
//! 4. Orchestrator (+ Brave search when a key is configured)
//! 5. Reminder store and ban registry

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use chatcord_agent::{BraveSearch, ConversationOrchestrator, OrchestratorSettings};
use chatcord_core::bans::BanRegistry;
use chatcord_core::config::Config;
use chatcord_core::crypto::{AesGcmCipher, RecordCipher};
use chatcord_core::session::{SessionCache, SessionSettings, SessionStore};
use chatcord_core::storage::{FsStore, KeyValueStore};
use chatcord_core::utils::{bans_dir, keys_dir, reminders_dir, sessions_dir};
use chatcord_providers::{FailoverDispatcher, LlmRequestConfig, ProviderFactory, ProviderRegistry};
use chatcord_reminders::ReminderStore;

use crate::helpers;

/// Every long-lived service, built once per process.
pub struct App {
    pub config: Config,
    pub data_dir: PathBuf,
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub reminders: Arc<ReminderStore>,
    pub bans: Arc<BanRegistry>,
}

impl App {
    pub fn build(config: Config) -> Result<Self> {
        let data_dir = helpers::expand_tilde(&config.storage.data_dir);
        let open = |dir: PathBuf| -> Result<Arc<dyn KeyValueStore>> {
            let store = FsStore::new(dir.clone()).with_context(|| format!("failed to create {}", dir.display()))?;
            Ok(Arc::new(store))
        };

        // Sessions
        let storage = &config.storage;
        let cache = storage.cache_enabled.then(|| {
            SessionCache::new(
                chrono::Duration::seconds(storage.sliding_ttl_secs as i64),
                chrono::Duration::seconds(storage.absolute_ttl_secs as i64),
            )
        });
        let cipher: Option<Arc<dyn RecordCipher>> = if storage.encrypt_user_data || storage.encrypt_channels {
            Some(Arc::new(AesGcmCipher::new(open(keys_dir(&data_dir))?)))
        } else {
            None
        };
        let settings = SessionSettings {
            default_model: config.bot.default_model.clone(),
            system_channel: config.bot.system_channel_id,
            encrypt_user_data: storage.encrypt_user_data,
            encrypt_channels: storage.encrypt_channels,
            apply_instruction_to_all: config.bot.apply_instruction_to_all,
            instruction_file: Some(instruction_path(&data_dir, &config.bot.instruction_file)),
        };
        let sessions = Arc::new(SessionStore::new(open(sessions_dir(&data_dir))?, cipher, cache, settings));

        // Providers
        let factory = ProviderFactory::with_catalog();
        let registry = Arc::new(ProviderRegistry::from_config(&config, &factory, |key| std::env::var(key).ok()));
        if registry.is_empty() {
            warn!("no model has a usable provider; every chat turn will fail");
        }
        let dispatcher = Arc::new(
            FailoverDispatcher::new(registry, LlmRequestConfig::from(&config.bot))
                .with_deadline(Duration::from_secs(config.failover.deadline_secs)),
        );

        // Orchestrator
        let mut orchestrator =
            ConversationOrchestrator::new(sessions, dispatcher, OrchestratorSettings::from(&config.bot));
        match BraveSearch::new(&config.search) {
            Ok(search) => {
                orchestrator = orchestrator.with_search(Arc::new(search));
                debug!("search augmentation enabled");
            }
            Err(e) => debug!(reason = %e, "search augmentation disabled"),
        }

        // Reminders and bans
        let reminders = Arc::new(ReminderStore::new(open(reminders_dir(&data_dir))?));
        let bans = Arc::new(BanRegistry::new(
            open(bans_dir(&data_dir))?,
            config.bans.admin_id,
            Some(Duration::from_secs(config.bans.cleanup_interval_secs)),
        ));

        info!(data_dir = %data_dir.display(), model = %config.bot.default_model, "services ready");
        Ok(Self {
            config,
            data_dir,
            orchestrator: Arc::new(orchestrator),
            reminders,
            bans,
        })
    }
}

/// The instruction file path; relative paths are resolved against the data dir.
pub fn instruction_path(data_dir: &Path, file: &str) -> PathBuf {
    let path = helpers::expand_tilde(file);
    if path.is_absolute() {
        path
    } else {
        data_dir.join(path)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.to_string_lossy().into_owned();
        config
    }

    #[test]
    fn test_instruction_path() {
        let data = Path::new("/data");
        assert_eq!(instruction_path(data, "system_prompt.txt"), PathBuf::from("/data/system_prompt.txt"));
        assert_eq!(instruction_path(data, "/etc/prompt.txt"), PathBuf::from("/etc/prompt.txt"));
    }

    #[tokio::test]
    async fn test_build_creates_data_layout() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::build(config_in(dir.path())).unwrap();

        assert!(dir.path().join("user_data").is_dir());
        assert!(dir.path().join("reminders").is_dir());
        assert!(dir.path().join("bans").is_dir());
        // Encryption is off by default, so no key store
        assert!(!dir.path().join("keys").exists());
        assert!(!app.orchestrator.available_models().is_empty());
    }

    #[tokio::test]
    async fn test_build_with_encryption_opens_key_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.storage.encrypt_user_data = true;
        App::build(config).unwrap();
        assert!(dir.path().join("keys").is_dir());
    }
}
