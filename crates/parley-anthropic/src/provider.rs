//! Anthropic `Provider` implementation.

use parley::chat::Turn;
use parley::error::LlmError;
use parley::provider::{Capabilities, Provider, ProviderMetadata, RequestContext};
use parley::stream::DeltaStream;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::instrument;

use crate::config::AnthropicConfig;
use crate::convert::{self, Output};

/// What the Messages API can express.
const CAPABILITIES: Capabilities = Capabilities {
    parallel_tools: true,
    additional_properties: true,
    requires_root_object: true,
    documents: true,
    remote_images: true,
};

/// Anthropic Claude provider implementing [`Provider`].
///
/// # Example
///
/// ```rust,no_run
/// use parley::Chat;
/// use parley_anthropic::{AnthropicConfig, AnthropicProvider};
///
/// # async fn example() -> Result<(), parley::LlmError> {
/// let provider = AnthropicProvider::new(AnthropicConfig {
///     api_key: std::env::var("ANTHROPIC_API_KEY").unwrap(),
///     ..Default::default()
/// });
///
/// let mut chat = Chat::new(provider);
/// let answer = chat.chat("Hello!", false).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Creates a provider from configuration.
    ///
    /// If `config.client` is `Some`, that client is reused for connection
    /// pooling. Otherwise a new client is built with the configured timeout.
    pub fn new(config: AnthropicConfig) -> Self {
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

    fn default_headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|_| {
                LlmError::InvalidRequest("API key contains invalid header characters".into())
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(&self.config.api_version).map_err(|_| {
                LlmError::InvalidRequest("API version contains invalid header characters".into())
            })?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn messages_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/v1/messages")
    }

    /// Posts a request and returns the raw response once the HTTP status
    /// is known to be a success.
    async fn send_request(
        &self,
        ctx: &RequestContext,
        output: Option<&Output<'_>>,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let body = convert::build_request(ctx, output, &self.config, stream);

        let mut req = self
            .client
            .post(self.messages_url())
            .headers(self.default_headers()?)
            .json(&body);
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
                    status: e.status().map(|s| {
                        http::StatusCode::from_u16(s.as_u16())
                            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR)
                    }),
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
            tracing::debug!(status = %http_status, "anthropic request failed");
            return Err(convert::convert_error(http_status, &body));
        }

        Ok(response)
    }
}

impl Provider for AnthropicProvider {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn send(&self, ctx: &RequestContext) -> Result<Turn, LlmError> {
        CAPABILITIES.check("anthropic", ctx)?;
        let output = Output::from_context(ctx)?;

        let response = self.send_request(ctx, output.as_ref(), false).await?;
        let raw = response.text().await.map_err(|e| LlmError::Provider {
            status: None,
            body: format!("failed to read response body: {e}"),
            retryable: true,
        })?;
        let api_response: crate::types::Response =
            serde_json::from_str(&raw).map_err(|e| LlmError::ResponseFormat {
                message: format!("failed to parse Anthropic response: {e}"),
                raw: raw.clone(),
            })?;

        convert::convert_response(api_response, output.as_ref())
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn stream(&self, ctx: &RequestContext) -> Result<DeltaStream, LlmError> {
        CAPABILITIES.check("anthropic", ctx)?;
        if ctx.output.is_some() {
            return Err(LlmError::InvalidRequest(
                "anthropic does not stream structured output; use send".into(),
            ));
        }
        let response = self.send_request(ctx, None, true).await?;
        Ok(crate::stream::into_stream(response))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "anthropic".into(),
            model: self.config.model.clone(),
            capabilities: CAPABILITIES,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parley::schema::TypeSpec;

    use super::*;

    #[test]
    fn test_metadata() {
        let provider = AnthropicProvider::new(AnthropicConfig {
            model: "claude-sonnet-4-20250514".into(),
            ..Default::default()
        });
        let meta = provider.metadata();

        assert_eq!(meta.name, "anthropic");
        assert_eq!(meta.model, "claude-sonnet-4-20250514");
        assert!(meta.capabilities.additional_properties);
        assert!(meta.capabilities.requires_root_object);
        assert!(meta.capabilities.documents);
        assert!(meta.capabilities.remote_images);
    }

    #[test]
    fn test_messages_url() {
        let provider = AnthropicProvider::new(AnthropicConfig::default());
        assert_eq!(
            provider.messages_url(),
            "https://api.anthropic.com/v1/messages"
        );
    }

    #[test]
    fn test_messages_url_trailing_slash() {
        let provider = AnthropicProvider::new(AnthropicConfig {
            base_url: "https://proxy.example.com/".into(),
            ..Default::default()
        });
        assert_eq!(
            provider.messages_url(),
            "https://proxy.example.com/v1/messages"
        );
    }

    #[test]
    fn test_default_headers() {
        let provider = AnthropicProvider::new(AnthropicConfig {
            api_key: "sk-ant-test123".into(),
            ..Default::default()
        });
        let headers = provider.default_headers().unwrap();

        assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant-test123");
        assert_eq!(headers.get("anthropic-version").unwrap(), "2023-06-01");
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
    }

    #[test]
    fn test_default_headers_invalid_api_key() {
        let provider = AnthropicProvider::new(AnthropicConfig {
            api_key: "invalid\nkey".into(),
            ..Default::default()
        });
        assert!(matches!(
            provider.default_headers().unwrap_err(),
            LlmError::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_new_with_custom_client() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        let provider = AnthropicProvider::new(AnthropicConfig {
            client: Some(client),
            ..Default::default()
        });
        assert_eq!(provider.metadata().name, "anthropic");
    }

    #[tokio::test]
    async fn test_stream_rejects_structured_output() {
        let provider = AnthropicProvider::new(AnthropicConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..Default::default()
        });
        let ctx = RequestContext {
            turns: vec![Turn::user("hi")],
            output: Some(TypeSpec::object().field("a", TypeSpec::string()).build()),
            ..Default::default()
        };
        let Err(err) = provider.stream(&ctx).await else {
            panic!("expected an error");
        };
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_connection_error_maps_to_provider_error() {
        // Nothing listens on the discard port.
        let provider = AnthropicProvider::new(AnthropicConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..Default::default()
        });
        let ctx = RequestContext {
            turns: vec![Turn::user("hi")],
            ..Default::default()
        };
        let err = provider.send(&ctx).await.unwrap_err();
        assert!(matches!(err, LlmError::Provider { status: None, .. }));
    }
}
