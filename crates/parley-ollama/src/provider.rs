//! Ollama `Provider` implementation.

use parley::chat::Turn;
use parley::error::LlmError;
use parley::provider::{Capabilities, Provider, ProviderMetadata, RequestContext};
use parley::stream::DeltaStream;
use tracing::instrument;

use crate::config::OllamaConfig;
use crate::convert::{self, Output};

/// What `/api/chat` can express. Images must be inline and there is no
/// document input.
const CAPABILITIES: Capabilities = Capabilities {
    parallel_tools: true,
    additional_properties: false,
    requires_root_object: false,
    documents: false,
    remote_images: false,
};

/// Ollama provider implementing [`Provider`].
///
/// Talks to a local (or remote) Ollama server. No API key is needed.
///
/// ```rust,no_run
/// use parley::Chat;
/// use parley_ollama::{OllamaConfig, OllamaProvider};
///
/// # async fn example() -> Result<(), parley::LlmError> {
/// let provider = OllamaProvider::new(OllamaConfig::default());
/// let mut chat = Chat::new(provider);
/// let answer = chat.chat("Why is the sky blue?", false).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OllamaProvider {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Creates a provider from configuration.
    ///
    /// If `config.client` is `Some`, that client is reused for connection
    /// pooling. Otherwise a new client is built with the configured timeout.
    pub fn new(config: OllamaConfig) -> Self {
        let client = config.client.clone().unwrap_or_else(|| {
            let mut builder = reqwest::Client::builder();
            if let Some(timeout) = config.timeout {
                builder = builder.timeout(timeout);
            }
            builder.build().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            })
        });
        Self { config, client }
    }

    fn chat_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/api/chat")
    }

    /// Posts a request and returns the raw response once the HTTP status
    /// is known to be a success.
    async fn send_request(
        &self,
        ctx: &RequestContext,
        output: Option<&Output<'_>>,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let body = convert::build_request(ctx, output, &self.config, stream)?;

        let mut req = self.client.post(self.chat_url()).json(&body);
        if let Some(timeout) = ctx.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    elapsed_ms: ctx
                        .timeout
                        .or(self.config.timeout)
                        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                }
            } else {
                LlmError::Provider {
                    status: None,
                    body: e.to_string(),
                    retryable: e.is_connect(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let http_status = http::StatusCode::from_u16(status.as_u16())
                .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
            tracing::debug!(status = %http_status, "ollama request failed");
            return Err(convert::convert_error(http_status, &body));
        }

        Ok(response)
    }
}

impl Provider for OllamaProvider {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn send(&self, ctx: &RequestContext) -> Result<Turn, LlmError> {
        CAPABILITIES.check("ollama", ctx)?;
        let output = Output::from_context(ctx)?;

        let response = self.send_request(ctx, output.as_ref(), false).await?;
        let body = response.text().await.map_err(|e| LlmError::Provider {
            status: None,
            body: format!("failed to read response body: {e}"),
            retryable: true,
        })?;
        let api_response: crate::types::Response =
            serde_json::from_str(&body).map_err(|e| LlmError::ResponseFormat {
                message: format!("failed to parse Ollama response: {e}"),
                raw: body.clone(),
            })?;

        convert::convert_response(api_response, output.as_ref())
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn stream(&self, ctx: &RequestContext) -> Result<DeltaStream, LlmError> {
        CAPABILITIES.check("ollama", ctx)?;
        let output = Output::from_context(ctx)?;
        let response = self.send_request(ctx, output.as_ref(), true).await?;
        Ok(crate::stream::into_stream(response))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "ollama".into(),
            model: self.config.model.clone(),
            capabilities: CAPABILITIES,
        }
    }
}
