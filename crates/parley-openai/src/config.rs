//! `OpenAI` adapter configuration.

use std::time::Duration;

use parley::LlmError;

/// Configuration for the `OpenAI` adapter.
///
/// Use struct update syntax with [`Default`]:
///
/// ```rust
/// use parley_openai::OpenAiConfig;
///
/// let config = OpenAiConfig {
///     api_key: "sk-...".into(),
///     model: "gpt-4o-mini".into(),
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct OpenAiConfig {
    /// `OpenAI` API key. Required.
    pub api_key: String,
    /// Model identifier (e.g. `"gpt-4o"`, `"gpt-4o-mini"`).
    pub model: String,
    /// Base URL for the API. Override for proxies, Azure, or compatible
    /// local servers.
    pub base_url: String,
    /// Optional organization ID sent as `OpenAI-Organization`.
    pub organization: Option<String>,
    /// `max_completion_tokens` used when the request does not set one.
    pub max_tokens: Option<u32>,
    /// Transport timeout. `None` uses reqwest's default.
    pub timeout: Option<Duration>,
    /// Shared HTTP client for connection pooling. When `None`, a new
    /// client is created.
    pub client: Option<reqwest::Client>,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("client", &self.client.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o".into(),
            base_url: "https://api.openai.com/v1".into(),
            organization: None,
            max_tokens: None,
            timeout: None,
            client: None,
        }
    }
}

impl OpenAiConfig {
    /// Builds a config from `OPENAI_API_KEY`, taking `OPENAI_MODEL`,
    /// `OPENAI_BASE_URL` and `OPENAI_ORG_ID` when they are set.
    pub fn from_env() -> Result<Self, LlmError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LlmError> {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let api_key = var("OPENAI_API_KEY")
            .ok_or_else(|| LlmError::InvalidRequest("OPENAI_API_KEY is not set".into()))?;

        let mut config = Self {
            api_key,
            organization: var("OPENAI_ORG_ID"),
            ..Self::default()
        };
        if let Some(model) = var("OPENAI_MODEL") {
            config.model = model;
        }
        if let Some(base_url) = var("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = OpenAiConfig::default();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert!(config.api_key.is_empty());
        assert!(config.organization.is_none());
        assert!(config.max_tokens.is_none());
        assert!(config.client.is_none());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = OpenAiConfig {
            api_key: "sk-super-secret".into(),
            ..Default::default()
        };
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sk-super-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_from_lookup() {
        let config = OpenAiConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-env"),
            ("OPENAI_BASE_URL", "http://localhost:8000/v1"),
            ("OPENAI_ORG_ID", "org-env"),
        ]))
        .unwrap();

        assert_eq!(config.api_key, "sk-env");
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.base_url, "http://localhost:8000/v1");
        assert_eq!(config.organization.as_deref(), Some("org-env"));
    }

    #[test]
    fn test_from_lookup_requires_key() {
        let err = OpenAiConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(ref m) if m.contains("OPENAI_API_KEY")));
    }
}
