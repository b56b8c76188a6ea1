//! Ollama adapter configuration.

use std::time::Duration;

/// Configuration for the Ollama adapter.
///
/// Use struct update syntax with [`Default`]:
///
/// ```rust
/// use parley_ollama::OllamaConfig;
///
/// let config = OllamaConfig {
///     model: "qwen2.5".into(),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Model identifier (e.g. `"llama3.2"`, `"mistral"`).
    pub model: String,
    /// Base URL of the Ollama server. Defaults to `http://localhost:11434`.
    pub base_url: String,
    /// `num_predict` used when the request does not set `max_tokens`.
    pub max_tokens: Option<u32>,
    /// Transport timeout. `None` uses reqwest's default.
    pub timeout: Option<Duration>,
    /// Shared HTTP client for connection pooling. When `None`, a new
    /// client is created.
    pub client: Option<reqwest::Client>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            base_url: "http://localhost:11434".into(),
            max_tokens: None,
            timeout: None,
            client: None,
        }
    }
}

impl OllamaConfig {
    /// Builds a config from the environment: `OLLAMA_MODEL` and
    /// `OLLAMA_HOST` when set, defaults otherwise.
    ///
    /// `OLLAMA_HOST` follows the server's own convention, so a bare
    /// `host:port` gets an `http://` scheme.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let mut config = Self::default();
        if let Some(model) = var("OLLAMA_MODEL") {
            config.model = model;
        }
        if let Some(host) = var("OLLAMA_HOST") {
            config.base_url = if host.contains("://") {
                host
            } else {
                format!("http://{host}")
            };
        }
        config
    }
}
