//! Chatcord core: shared types, configuration, persistence, and the ban registry.

pub mod bans;
pub mod config;
pub mod crypto;
pub mod session;
pub mod storage;
pub mod types;
pub mod utils;
