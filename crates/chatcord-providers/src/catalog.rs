//! Provider catalog: static specs for every backend the bot can talk to,
//! plus the built-in model table.
//!
//! Each `ProviderSpec` describes how to reach one OpenAI-compatible endpoint
//! and which canonical model names it serves. The `models` list doubles as the
//! capability table used when credentialed providers are added to the registry.

use std::collections::{BTreeMap, HashMap};

use chatcord_core::config::ProviderConfig;

// ─────────────────────────────────────────────
// ProviderSpec: static metadata for one provider
// ─────────────────────────────────────────────

/// Static specification describing one chat backend.
#[derive(Clone, Debug)]
pub struct ProviderSpec {
    /// Internal name (e.g. `"groq"`), used in config and the model table.
    pub name: &'static str,
    /// Conventional environment variable holding the API key.
    pub env_key: Option<&'static str>,
    /// Human-readable name for logs.
    pub display_name: &'static str,
    /// Base URL; `/chat/completions` is appended.
    pub default_api_base: &'static str,
    /// Whether calls need a bearer token.
    pub requires_key: bool,
    /// Supported models as `(canonical name, backend model id)`.
    pub models: &'static [(&'static str, &'static str)],
}

impl ProviderSpec {
    /// Whether this provider serves `model` (canonical name).
    pub fn supports(&self, model: &str) -> bool {
        self.models.iter().any(|(name, _)| *name == model)
    }

    /// The id this backend expects for a canonical model name.
    /// Unknown names pass through unchanged.
    pub fn wire_model<'a>(&self, model: &'a str) -> &'a str {
        self.models
            .iter()
            .find(|(name, _)| *name == model)
            .map(|(_, id)| *id)
            .unwrap_or(model)
    }
}

// ─────────────────────────────────────────────
// All providers
// ─────────────────────────────────────────────

/// Every known provider. Credentialed ones are listed in the order their
/// keys are checked at startup.
pub static PROVIDERS: &[ProviderSpec] = &[
    // Keyless public endpoint; backs most of the built-in table
    ProviderSpec {
        name: "pollinations",
        env_key: None,
        display_name: "Pollinations",
        default_api_base: "https://text.pollinations.ai/openai",
        requires_key: false,
        models: &[
            ("gpt-4o-mini", "openai"),
            ("gpt-4o", "openai-large"),
            ("o3-mini", "openai-reasoning"),
            ("gemini-2.0-flash", "gemini"),
            ("llama-3.3-70b", "llama"),
            ("llama-4-scout", "llamascout"),
            ("qwen-2.5-coder-32b", "qwen-coder"),
            ("deepseek-v3", "deepseek"),
            ("deepseek-r1", "deepseek-reasoning"),
            ("phi-4", "phi"),
        ],
    },
    ProviderSpec {
        name: "groq",
        env_key: Some("GROQ_API_KEY"),
        display_name: "Groq",
        default_api_base: "https://api.groq.com/openai/v1",
        requires_key: true,
        models: &[
            ("llama-3.3-70b", "llama-3.3-70b-versatile"),
            ("llama-4-scout", "meta-llama/llama-4-scout-17b-16e-instruct"),
            ("deepseek-r1", "deepseek-r1-distill-llama-70b"),
            ("qwq-32b", "qwen-qwq-32b"),
        ],
    },
    ProviderSpec {
        name: "openai",
        env_key: Some("OPENAI_API_KEY"),
        display_name: "OpenAI",
        default_api_base: "https://api.openai.com/v1",
        requires_key: true,
        models: &[
            ("gpt-4o-mini", "gpt-4o-mini"),
            ("gpt-4o", "gpt-4o"),
            ("o3-mini", "o3-mini"),
        ],
    },
    ProviderSpec {
        name: "perplexity",
        env_key: Some("PERPLEXITY_API_KEY"),
        display_name: "Perplexity",
        default_api_base: "https://api.perplexity.ai",
        requires_key: true,
        models: &[("sonar", "sonar"), ("sonar-pro", "sonar-pro"), ("r1-1776", "r1-1776")],
    },
    ProviderSpec {
        name: "deepinfra",
        env_key: Some("DEEPINFRA_API_KEY"),
        display_name: "DeepInfra",
        default_api_base: "https://api.deepinfra.com/v1/openai",
        requires_key: true,
        models: &[
            ("llama-3.3-70b", "meta-llama/Llama-3.3-70B-Instruct"),
            ("qwen-2.5-72b", "Qwen/Qwen2.5-72B-Instruct"),
            ("deepseek-v3", "deepseek-ai/DeepSeek-V3"),
            ("deepseek-r1", "deepseek-ai/DeepSeek-R1"),
            ("phi-4", "microsoft/phi-4"),
            ("gemma-3-27b", "google/gemma-3-27b-it"),
        ],
    },
    ProviderSpec {
        name: "huggingface",
        env_key: Some("HUGGINGFACE_API_KEY"),
        display_name: "HuggingFace",
        default_api_base: "https://router.huggingface.co/v1",
        requires_key: true,
        models: &[
            ("llama-3.3-70b", "meta-llama/Llama-3.3-70B-Instruct"),
            ("qwen-2.5-72b", "Qwen/Qwen2.5-72B-Instruct"),
            ("qwen-2.5-coder-32b", "Qwen/Qwen2.5-Coder-32B-Instruct"),
            ("qwq-32b", "Qwen/QwQ-32B"),
            ("command-r-plus", "CohereForAI/c4ai-command-r-plus-08-2024"),
            ("phi-3.5-mini", "microsoft/Phi-3.5-mini-instruct"),
            ("deepseek-r1", "deepseek-ai/DeepSeek-R1"),
        ],
    },
];

/// Built-in model → provider list, used when `models` is empty in config.
///
/// Only keyless providers appear here; credentialed ones are prepended at
/// startup for the models they support.
pub static DEFAULT_MODEL_TABLE: &[(&str, &[&str])] = &[
    ("gpt-4o-mini", &["pollinations"]),
    ("gpt-4o", &["pollinations"]),
    ("o3-mini", &["pollinations"]),
    ("gemini-2.0-flash", &["pollinations"]),
    ("llama-3.3-70b", &["pollinations"]),
    ("llama-4-scout", &["pollinations"]),
    ("qwen-2.5-72b", &[]),
    ("qwen-2.5-coder-32b", &["pollinations"]),
    ("qwq-32b", &[]),
    ("deepseek-v3", &["pollinations"]),
    ("deepseek-r1", &["pollinations"]),
    ("phi-4", &["pollinations"]),
    ("command-r-plus", &[]),
];

// ─────────────────────────────────────────────
// Lookups
// ─────────────────────────────────────────────

/// Find a provider spec by exact name.
pub fn find_by_name(name: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|spec| spec.name == name)
}

/// The operator's table if configured, the built-in one otherwise.
pub fn model_table(configured: &BTreeMap<String, Vec<String>>) -> BTreeMap<String, Vec<String>> {
    if !configured.is_empty() {
        return configured.clone();
    }
    DEFAULT_MODEL_TABLE
        .iter()
        .map(|(model, providers)| {
            (
                model.to_string(),
                providers.iter().map(|p| p.to_string()).collect(),
            )
        })
        .collect()
}

/// Merge configured provider settings with conventional env vars.
///
/// A key set in config wins; otherwise the provider's `env_key` is read
/// through `lookup`. Every catalog provider gets an entry (possibly keyless),
/// and configured providers missing from the catalog are kept as-is.
pub fn effective_provider_configs<F>(
    configured: &HashMap<String, ProviderConfig>,
    lookup: F,
) -> HashMap<String, ProviderConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = configured.clone();
    for spec in PROVIDERS {
        let entry = merged.entry(spec.name.to_string()).or_default();
        if entry.api_key.trim().is_empty() {
            if let Some(key) = spec.env_key.and_then(&lookup) {
                entry.api_key = key.trim().to_string();
            }
        }
    }
    merged
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
