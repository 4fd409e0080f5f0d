//! LLM provider layer for Chatcord.
//!
//! # Architecture
//!
//! - [`traits::LlmProvider`]: trait that all providers implement
//! - [`catalog`]: static specs for the supported backends + built-in model table
//! - [`factory::ProviderFactory`]: provider name → constructor
//! - [`registry::ProviderRegistry`]: model → ordered provider list
//! - [`failover::FailoverDispatcher`]: tries providers in order, promotes the first success
//! - [`http_provider::HttpProvider`]: generic OpenAI-compatible HTTP client

pub mod catalog;
pub mod factory;
pub mod failover;
pub mod http_provider;
pub mod registry;
pub mod traits;

// Re-export main types for convenience
pub use catalog::{ProviderSpec, PROVIDERS};
pub use factory::ProviderFactory;
pub use failover::{DispatchOutcome, FailoverDispatcher};
pub use http_provider::HttpProvider;
pub use registry::ProviderRegistry;
pub use traits::{LlmProvider, LlmRequestConfig, ProviderHandle};
