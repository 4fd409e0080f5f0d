//! Chatcord agent: the conversation turn and what feeds into it.
//!
//! This crate contains:
//! - **orchestrator**: load session → trim → search → failover dispatch → persist
//! - **search**: search capability trait and the Brave-backed implementation
//! - **presets**: built-in instruction presets

pub mod orchestrator;
pub mod presets;
pub mod search;

pub use orchestrator::{ConversationOrchestrator, OrchestratorSettings};
pub use presets::{find_preset, Preset, PRESETS};
pub use search::{BraveSearch, SearchHit, SearchKind, SearchProvider};
