//! Factory for building Anthropic providers from configuration.

use parley::registry::{ProviderConfig, ProviderFactory, ProviderRegistry};
use parley::{DynProvider, LlmError};

use crate::{AnthropicConfig, AnthropicProvider};

/// Factory for creating [`AnthropicProvider`] instances from configuration.
///
/// ```rust,no_run
/// use parley::ProviderRegistry;
/// use parley_anthropic::AnthropicFactory;
///
/// ProviderRegistry::global().register(Box::new(AnthropicFactory));
/// ```
///
/// # Configuration
///
/// | Field | Required | Description |
/// |-------|----------|-------------|
/// | `provider` | Yes | Must be `"anthropic"` |
/// | `api_key` | No | Falls back to `ANTHROPIC_API_KEY` |
/// | `model` | Yes | Model identifier (e.g., `"claude-sonnet-4-20250514"`) |
/// | `base_url` | No | Custom API endpoint |
/// | `timeout` | No | Request timeout |
/// | `extra.max_tokens` | No | Default max tokens (default: 4096) |
/// | `extra.api_version` | No | API version header |
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicFactory;

impl ProviderFactory for AnthropicFactory {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn build(&self, config: &ProviderConfig) -> Result<Box<dyn DynProvider>, LlmError> {
        if config.model.is_empty() {
            return Err(LlmError::InvalidRequest(
                "anthropic provider requires model".into(),
            ));
        }

        let mut anthropic_config = AnthropicConfig {
            api_key: config.api_key_or_env("ANTHROPIC_API_KEY")?,
            model: config.model.clone(),
            timeout: config.timeout,
            ..Default::default()
        };
        if let Some(base_url) = &config.base_url {
            anthropic_config.base_url.clone_from(base_url);
        }
        if let Some(max_tokens) = config.get_extra_u64("max_tokens") {
            anthropic_config.max_tokens =
                u32::try_from(max_tokens).unwrap_or(anthropic_config.max_tokens);
        }
        if let Some(api_version) = config.get_extra_str("api_version") {
            anthropic_config.api_version = api_version.to_string();
        }

        Ok(Box::new(AnthropicProvider::new(anthropic_config)))
    }
}

/// Registers the Anthropic factory with the global registry.
pub fn register_global() {
    ProviderRegistry::global().register(Box::new(AnthropicFactory));
}
