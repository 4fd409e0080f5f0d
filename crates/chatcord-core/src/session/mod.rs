//! Conversation sessions: TTL cache, persistent store, and history trimming.
//!
//! # Disk format
//!
//! One JSON file per scope under `<data_dir>/user_data/`:
//! `system.json`, `user_<id>.json`, `channel_<id>.json`.
//! Encrypted scopes hold base64 ciphertext instead of JSON.

pub mod cache;
pub mod history;
pub mod store;

pub use cache::{CacheEntry, SessionCache};
pub use history::{push_user_turn, trim_history};
pub use store::{SessionSettings, SessionStore};
