//! Configuration system: schema, loading, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use chatcord_core::config;
//!
//! let cfg = config::load_config(None);
//! println!("Model: {}", cfg.bot.default_model);
//! ```

pub mod loader;
pub mod schema;

// Re-export key types
pub use loader::{get_config_path, load_config, save_config};
pub use schema::{
    BansConfig, BotConfig, Config, FailoverConfig, ProviderConfig, RemindersConfig,
    SearchConfig, StorageConfig,
};
