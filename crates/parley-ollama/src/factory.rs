//! Factory for building Ollama providers from configuration.

use parley::registry::{ProviderConfig, ProviderFactory, ProviderRegistry};
use parley::{DynProvider, LlmError};

use crate::{OllamaConfig, OllamaProvider};

/// Factory for creating [`OllamaProvider`] instances from configuration.
///
/// ```rust,no_run
/// use parley::ProviderRegistry;
/// use parley_ollama::OllamaFactory;
///
/// ProviderRegistry::global().register(Box::new(OllamaFactory));
/// ```
///
/// # Configuration
///
/// | Field | Required | Description |
/// |-------|----------|-------------|
/// | `provider` | Yes | Must be `"ollama"` |
/// | `api_key` | No | Ignored; Ollama has no auth |
/// | `model` | Yes | Model identifier (e.g., `"llama3.2"`) |
/// | `base_url` | No | Server URL (default: `http://localhost:11434`) |
/// | `timeout` | No | Request timeout |
/// | `extra.max_tokens` | No | Default `num_predict` |
#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaFactory;

impl ProviderFactory for OllamaFactory {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn build(&self, config: &ProviderConfig) -> Result<Box<dyn DynProvider>, LlmError> {
        if config.model.is_empty() {
            return Err(LlmError::InvalidRequest(
                "ollama provider requires model".into(),
            ));
        }

        let mut ollama_config = OllamaConfig {
            model: config.model.clone(),
            timeout: config.timeout,
            max_tokens: config
                .get_extra_u64("max_tokens")
                .and_then(|n| u32::try_from(n).ok()),
            ..Default::default()
        };
        if let Some(base_url) = &config.base_url {
            ollama_config.base_url.clone_from(base_url);
        }

        Ok(Box::new(OllamaProvider::new(ollama_config)))
    }
}

/// Registers the Ollama factory with the global registry.
pub fn register_global() {
    ProviderRegistry::global().register(Box::new(OllamaFactory));
}
