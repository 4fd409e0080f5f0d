//! LLM provider trait and the identity-comparable handle the registry stores.
//!
//! Every chat backend implements [`LlmProvider`]. The `HttpProvider` in
//! `http_provider.rs` covers all OpenAI-compatible APIs.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use chatcord_core::config::BotConfig;
use chatcord_core::types::ChatMessage;

/// Sampling options passed to each LLM call.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

impl From<&BotConfig> for LlmRequestConfig {
    fn from(bot: &BotConfig) -> Self {
        Self {
            max_tokens: bot.max_tokens,
            temperature: bot.temperature,
        }
    }
}

/// A backend that can complete a chat.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and return the assistant text.
    ///
    /// Any transport, status or decoding problem is an `Err`; the dispatcher
    /// moves on to the next provider.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        config: &LlmRequestConfig,
    ) -> anyhow::Result<String>;

    /// Stable identifier (e.g. `"groq"`). Two handles with the same name are the same provider.
    fn name(&self) -> &str;

    /// Display name for logs and status output.
    fn display_name(&self) -> &str {
        self.name()
    }
}

// ─────────────────────────────────────────────
// ProviderHandle
// ─────────────────────────────────────────────

/// Shared, cheaply clonable reference to a provider.
///
/// Equality is by [`LlmProvider::name`], which is what list membership and
/// move-to-front in the registry rely on.
#[derive(Clone)]
pub struct ProviderHandle(Arc<dyn LlmProvider>);

impl ProviderHandle {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self(provider)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }
}

impl Deref for ProviderHandle {
    type Target = dyn LlmProvider;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for ProviderHandle {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for ProviderHandle {}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProviderHandle").field(&self.name()).finish()
    }
}

impl<P: LlmProvider + 'static> From<Arc<P>> for ProviderHandle {
    fn from(provider: Arc<P>) -> Self {
        Self(provider)
    }
}
