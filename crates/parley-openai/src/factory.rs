//! Factory for building `OpenAI` providers from configuration.

use parley::registry::{ProviderConfig, ProviderFactory, ProviderRegistry};
use parley::{DynProvider, LlmError};

use crate::{OpenAiConfig, OpenAiProvider};

/// Factory for creating [`OpenAiProvider`] instances from configuration.
///
/// ```rust,no_run
/// use parley::ProviderRegistry;
/// use parley_openai::OpenAiFactory;
///
/// ProviderRegistry::global().register(Box::new(OpenAiFactory));
/// ```
///
/// # Configuration
///
/// | Field | Required | Description |
/// |-------|----------|-------------|
/// | `provider` | Yes | Must be `"openai"` |
/// | `api_key` | No | Falls back to `OPENAI_API_KEY` |
/// | `model` | Yes | Model identifier (e.g., `"gpt-4o"`) |
/// | `base_url` | No | Custom API endpoint |
/// | `timeout` | No | Request timeout |
/// | `extra.organization` | No | `OpenAI` organization ID |
/// | `extra.max_tokens` | No | Default `max_completion_tokens` |
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiFactory;

impl ProviderFactory for OpenAiFactory {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn build(&self, config: &ProviderConfig) -> Result<Box<dyn DynProvider>, LlmError> {
        if config.model.is_empty() {
            return Err(LlmError::InvalidRequest(
                "openai provider requires model".into(),
            ));
        }

        let mut openai_config = OpenAiConfig {
            api_key: config.api_key_or_env("OPENAI_API_KEY")?,
            model: config.model.clone(),
            timeout: config.timeout,
            organization: config.get_extra_str("organization").map(str::to_string),
            max_tokens: config
                .get_extra_u64("max_tokens")
                .and_then(|n| u32::try_from(n).ok()),
            ..Default::default()
        };
        if let Some(base_url) = &config.base_url {
            openai_config.base_url.clone_from(base_url);
        }

        Ok(Box::new(OpenAiProvider::new(openai_config)))
    }
}

/// Registers the `OpenAI` factory with the global registry.
pub fn register_global() {
    ProviderRegistry::global().register(Box::new(OpenAiFactory));
}
