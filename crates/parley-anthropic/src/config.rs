//! Anthropic adapter configuration.

use std::time::Duration;

use parley::LlmError;

/// Configuration for the Anthropic adapter.
///
/// Use struct update syntax with [`Default`]:
///
/// ```rust
/// use parley_anthropic::AnthropicConfig;
///
/// let config = AnthropicConfig {
///     api_key: "sk-ant-...".into(),
///     model: "claude-sonnet-4-20250514".into(),
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct AnthropicConfig {
    /// Anthropic API key. Required.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Base URL for the API. Override for proxies or testing.
    pub base_url: String,
    /// `max_tokens` sent when the request does not set one. The Messages
    /// API requires a value on every call.
    pub max_tokens: u32,
    /// `anthropic-version` header.
    pub api_version: String,
    /// Transport timeout. `None` uses reqwest's default.
    pub timeout: Option<Duration>,
    /// Shared HTTP client for connection pooling. When `None`, a new
    /// client is created.
    pub client: Option<reqwest::Client>,
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .field("client", &self.client.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-sonnet-4-20250514".into(),
            base_url: "https://api.anthropic.com".into(),
            max_tokens: 4096,
            api_version: "2023-06-01".into(),
            timeout: None,
            client: None,
        }
    }
}

impl AnthropicConfig {
    /// Builds a config from `ANTHROPIC_API_KEY`, taking `ANTHROPIC_MODEL`
    /// and `ANTHROPIC_BASE_URL` as overrides when they are set.
    pub fn from_env() -> Result<Self, LlmError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LlmError> {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let api_key = var("ANTHROPIC_API_KEY")
            .ok_or_else(|| LlmError::InvalidRequest("ANTHROPIC_API_KEY is not set".into()))?;

        let mut config = Self {
            api_key,
            ..Self::default()
        };
        if let Some(model) = var("ANTHROPIC_MODEL") {
            config.model = model;
        }
        if let Some(base_url) = var("ANTHROPIC_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }
}
