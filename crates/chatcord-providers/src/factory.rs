//! Provider factory: maps provider names to constructors.
//!
//! Names come from config (the model table and `providers` section), so they
//! are validated here. Unknown names and failed constructions are logged
//! and skipped; startup never aborts because of one bad provider entry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use chatcord_core::config::ProviderConfig;

use crate::catalog::PROVIDERS;
use crate::http_provider::HttpProvider;
use crate::traits::{LlmProvider, ProviderHandle};

/// Builds a provider from its (possibly keyless) config.
pub type ProviderConstructor =
    Arc<dyn Fn(&ProviderConfig) -> anyhow::Result<Arc<dyn LlmProvider>> + Send + Sync>;

/// Name → constructor table.
#[derive(Clone, Default)]
pub struct ProviderFactory {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderFactory {
    /// Empty factory; register constructors explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory pre-loaded with an [`HttpProvider`] constructor for every catalog entry.
    pub fn with_catalog() -> Self {
        let mut factory = Self::new();
        for spec in PROVIDERS {
            factory.register(
                spec.name,
                Arc::new(move |config: &ProviderConfig| {
                    let provider = HttpProvider::new(config, spec)?;
                    Ok(Arc::new(provider) as Arc<dyn LlmProvider>)
                }),
            );
        }
        factory
    }

    /// Add or replace the constructor for `name`.
    pub fn register(&mut self, name: impl Into<String>, constructor: ProviderConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Construct the provider called `name`. Logs and returns `None` on failure.
    pub fn build(&self, name: &str, config: &ProviderConfig) -> Option<ProviderHandle> {
        let Some(constructor) = self.constructors.get(name) else {
            warn!(provider = %name, "Unknown provider, skipping");
            return None;
        };
        match constructor(config) {
            Ok(provider) => {
                debug!(provider = %name, "Provider constructed");
                Some(ProviderHandle::new(provider))
            }
            Err(e) => {
                warn!(provider = %name, error = %e, "Provider unavailable, skipping");
                None
            }
        }
    }
}
