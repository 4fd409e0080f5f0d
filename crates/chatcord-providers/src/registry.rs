//! Provider registry: model name → ordered provider list.
//!
//! Order is attempt priority. The list for a model is reordered at runtime by
//! [`ProviderRegistry::promote`] (move-to-front after a success), so readers
//! always take a snapshot instead of iterating the live list.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use chatcord_core::config::{Config, ProviderConfig};

use crate::catalog::{effective_provider_configs, model_table, ProviderSpec, PROVIDERS};
use crate::factory::ProviderFactory;
use crate::traits::ProviderHandle;

/// Registry of candidate providers per model.
pub struct ProviderRegistry {
    table: RwLock<HashMap<String, Vec<ProviderHandle>>>,
    default_model: String,
}

impl ProviderRegistry {
    /// Empty registry. Unknown models fall back to `default_model`.
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            default_model: default_model.into(),
        }
    }

    /// Build the registry from config.
    ///
    /// 1. Static table: `config.models`, or the built-in table when empty.
    /// 2. Credentialed providers from the catalog are prepended for every
    ///    model they support that the static table already lists.
    ///
    /// `lookup` resolves conventional env vars such as `GROQ_API_KEY`.
    pub fn from_config<F>(config: &Config, factory: &ProviderFactory, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let registry = Self::new(config.bot.default_model.clone());
        let credentials = effective_provider_configs(&config.providers, lookup);
        let mut built: HashMap<String, Option<ProviderHandle>> = HashMap::new();

        for (model, names) in model_table(&config.models) {
            let mut handles = Vec::with_capacity(names.len());
            for name in names {
                let handle = built
                    .entry(name.clone())
                    .or_insert_with(|| {
                        let cfg = credentials.get(&name).cloned().unwrap_or_default();
                        factory.build(&name, &cfg)
                    })
                    .clone();
                if let Some(handle) = handle {
                    if !handles.contains(&handle) {
                        handles.push(handle);
                    }
                }
            }
            registry.set_providers(model, handles);
        }

        let credentialed: Vec<&'static ProviderSpec> =
            PROVIDERS.iter().filter(|spec| spec.requires_key).collect();
        registry.augment_from_credentials(&credentialed, &credentials, factory);

        info!(
            models = registry.len(),
            default_model = %registry.default_model,
            "Provider registry initialised"
        );
        registry
    }

    // ─────────────────────────────────────────
    // Lock helpers
    // ─────────────────────────────────────────

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<ProviderHandle>>> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<ProviderHandle>>> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────
    // Table access
    // ─────────────────────────────────────────

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Replace the provider list for `model`.
    pub fn set_providers(&self, model: impl Into<String>, providers: Vec<ProviderHandle>) {
        self.write().insert(model.into(), providers);
    }

    /// Snapshot of the providers to try for `model`, in order.
    ///
    /// Unknown models and models with an empty list use the default model's list.
    pub fn get_providers(&self, model: &str) -> Vec<ProviderHandle> {
        self.resolve(model).map(|(_, p)| p).unwrap_or_default()
    }

    /// Like [`get_providers`](Self::get_providers) but also returns the model
    /// key the list belongs to. `None` if neither `model` nor the default has providers.
    pub fn resolve(&self, model: &str) -> Option<(String, Vec<ProviderHandle>)> {
        let table = self.read();
        if let Some(list) = table.get(model).filter(|l| !l.is_empty()) {
            return Some((model.to_string(), list.clone()));
        }
        table
            .get(&self.default_model)
            .filter(|l| !l.is_empty())
            .map(|list| (self.default_model.clone(), list.clone()))
    }

    /// Move the provider named `provider` to the front of `model`'s list.
    ///
    /// Idempotent; returns whether the provider was found.
    pub fn promote(&self, model: &str, provider: &str) -> bool {
        let mut table = self.write();
        let Some(list) = table.get_mut(model) else {
            return false;
        };
        let Some(pos) = list.iter().position(|p| p.name() == provider) else {
            return false;
        };
        if pos > 0 {
            let handle = list.remove(pos);
            list.insert(0, handle);
            debug!(model = %model, provider = %provider, "Provider promoted");
        }
        true
    }

    /// Prepend `handle` to every listed model in `supported` that doesn't
    /// already have it. Returns the models it was added to.
    pub fn augment<'a, I>(&self, handle: &ProviderHandle, supported: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut table = self.write();
        let mut added = Vec::new();
        for model in supported {
            if let Some(list) = table.get_mut(model) {
                if !list.contains(handle) {
                    list.insert(0, handle.clone());
                    added.push(model.to_string());
                }
            }
        }
        added
    }

    /// Prepend every credentialed provider to the models it serves.
    ///
    /// Providers without a key are skipped; a key of `test` is accepted
    /// with a warning.
    pub fn augment_from_credentials(
        &self,
        specs: &[&'static ProviderSpec],
        credentials: &HashMap<String, ProviderConfig>,
        factory: &ProviderFactory,
    ) {
        for spec in specs {
            let Some(config) = credentials.get(spec.name).filter(|c| c.is_configured()) else {
                debug!(provider = spec.name, "No API key, skipping");
                continue;
            };
            let is_test = config.api_key.eq_ignore_ascii_case("test");
            if is_test {
                warn!(provider = spec.name, "Provider configured with a test key");
            }

            let Some(handle) = factory.build(spec.name, config) else {
                continue;
            };
            let added = self.augment(&handle, spec.models.iter().map(|(m, _)| *m));
            if !added.is_empty() {
                info!(
                    provider = spec.display_name,
                    test_key = is_test,
                    models = ?added,
                    "Provider added"
                );
            }
        }
    }

    /// All model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.read().keys().cloned().collect();
        models.sort();
        models
    }

    /// Model → provider names, for status output.
    pub fn describe(&self) -> BTreeMap<String, Vec<String>> {
        self.read()
            .iter()
            .map(|(model, list)| {
                (
                    model.clone(),
                    list.iter().map(|p| p.name().to_string()).collect(),
                )
            })
            .collect()
    }

    pub fn contains_model(&self, model: &str) -> bool {
        self.read().contains_key(model)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
