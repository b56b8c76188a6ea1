//! Named provider factories for configuration-driven backend selection.
//!
//! Adapter crates register a [`ProviderFactory`] under a lowercase name;
//! applications then build a provider from a [`ProviderConfig`] without
//! naming the adapter type at compile time.
//!
//! # Example
//!
//! ```rust,no_run
//! use parley::registry::{ProviderConfig, ProviderRegistry};
//! use parley::Chat;
//!
//! # fn example() -> Result<(), parley::LlmError> {
//! // Adapter crates expose a `register_global()` to call at startup.
//! let config = ProviderConfig::new("anthropic", "claude-sonnet-4-20250514")
//!     .api_key("sk-...");
//! let provider = ProviderRegistry::global().build(&config)?;
//! let chat = Chat::builder_boxed(provider).build();
//! # let _ = chat;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::DynProvider;

/// Backend-neutral settings for building a provider.
///
/// Adapter-specific knobs go in `extra`; each adapter documents the keys
/// it reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Registered factory name (`"anthropic"`, `"openai"`, `"ollama"`).
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// API key for authenticated backends.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Overrides the adapter's default endpoint.
    pub base_url: Option<String>,
    /// Transport timeout.
    pub timeout: Option<Duration>,
    /// Adapter-specific options.
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProviderConfig {
    /// Creates a config for the given provider and model.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds an adapter-specific option.
    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Gets a string option.
    pub fn get_extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }

    /// Gets a bool option.
    pub fn get_extra_bool(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(serde_json::Value::as_bool)
    }

    /// Gets an integer option.
    pub fn get_extra_u64(&self, key: &str) -> Option<u64> {
        self.extra.get(key).and_then(serde_json::Value::as_u64)
    }

    /// Returns the API key, falling back to the environment variable `var`.
    ///
    /// # Errors
    ///
    /// [`LlmError::InvalidRequest`] when neither is set.
    pub fn api_key_or_env(&self, var: &str) -> Result<String, LlmError> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        std::env::var(var).map_err(|_| {
            LlmError::InvalidRequest(format!(
                "{} requires an API key (set api_key or {var})",
                self.provider
            ))
        })
    }
}

/// Builds providers of one kind from configuration.
pub trait ProviderFactory: Send + Sync {
    /// Lowercase name used for registration and lookup.
    fn name(&self) -> &str;

    /// Creates a provider.
    ///
    /// # Errors
    ///
    /// Returns an error if required settings are missing or invalid.
    fn build(&self, config: &ProviderConfig) -> Result<Box<dyn DynProvider>, LlmError>;
}

/// A thread-safe map of provider factories.
///
/// Use [`ProviderRegistry::global()`] for the process-wide registry, or
/// [`ProviderRegistry::new()`] for an isolated one in tests.
pub struct ProviderRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ProviderFactory>>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<ProviderRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ProviderRegistry::new)
    }

    /// Registers a factory, replacing any with the same name.
    pub fn register(&self, factory: Box<dyn ProviderFactory>) -> &Self {
        self.register_shared(Arc::from(factory))
    }

    /// Registers a shared factory, replacing any with the same name.
    pub fn register_shared(&self, factory: Arc<dyn ProviderFactory>) -> &Self {
        let name = factory.name().to_lowercase();
        tracing::debug!(provider = %name, "registering provider factory");
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, factory);
        self
    }

    /// Removes a factory. Returns `true` if it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&name.to_lowercase())
            .is_some()
    }

    /// Whether a factory is registered under `name` (case-insensitive).
    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&name.to_lowercase())
    }

    /// Registered names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Builds a provider with the factory named by `config.provider`.
    ///
    /// # Errors
    ///
    /// [`LlmError::InvalidRequest`] if no such factory is registered, or
    /// whatever the factory returns.
    pub fn build(&self, config: &ProviderConfig) -> Result<Box<dyn DynProvider>, LlmError> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&config.provider.to_lowercase())
            .cloned();
        let Some(factory) = factory else {
            return Err(LlmError::InvalidRequest(format!(
                "unknown provider '{}'. Available: {:?}",
                config.provider,
                self.providers()
            )));
        };
        factory.build(config)
    }
}
