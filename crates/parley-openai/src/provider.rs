//! `OpenAI` `Provider` implementation.

use parley::chat::Turn;
use parley::error::LlmError;
use parley::provider::{Capabilities, Provider, ProviderMetadata, RequestContext};
use parley::stream::DeltaStream;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::instrument;

use crate::config::OpenAiConfig;
use crate::convert::{self, Output};

/// What the Chat Completions API can express. Strict structured output
/// rules out `additionalProperties` and non-object roots.
const CAPABILITIES: Capabilities = Capabilities {
    parallel_tools: true,
    additional_properties: false,
    requires_root_object: true,
    documents: true,
    remote_images: true,
};

/// `OpenAI` provider implementing [`Provider`].
///
/// Works with any server that speaks the Chat Completions dialect; point
/// `base_url` at it.
///
/// # Example
///
/// ```rust,no_run
/// use parley::Chat;
/// use parley_openai::{OpenAiConfig, OpenAiProvider};
///
/// # async fn example() -> Result<(), parley::LlmError> {
/// let provider = OpenAiProvider::new(OpenAiConfig {
///     api_key: std::env::var("OPENAI_API_KEY").unwrap(),
///     ..Default::default()
/// });
///
/// let mut chat = Chat::new(provider);
/// let answer = chat.chat("Hello!", false).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Creates a provider from configuration.
    ///
    /// If `config.client` is `Some`, that client is reused for connection
    /// pooling. Otherwise a new client is built with the configured timeout.
    pub fn new(config: OpenAiConfig) -> Self {
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
        let auth_value = format!("Bearer {}", self.config.api_key);
        headers.insert(
            "authorization",
            HeaderValue::from_str(&auth_value).map_err(|_| {
                LlmError::InvalidRequest("API key contains invalid header characters".into())
            })?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        if let Some(org) = &self.config.organization {
            headers.insert(
                "openai-organization",
                HeaderValue::from_str(org).map_err(|_| {
                    LlmError::InvalidRequest(
                        "organization ID contains invalid header characters".into(),
                    )
                })?,
            );
        }
        Ok(headers)
    }

    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
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

        let mut req = self
            .client
            .post(self.completions_url())
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
            tracing::debug!(status = %http_status, "openai request failed");
            return Err(convert::convert_error(http_status, &body));
        }

        Ok(response)
    }
}

impl Provider for OpenAiProvider {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn send(&self, ctx: &RequestContext) -> Result<Turn, LlmError> {
        CAPABILITIES.check("openai", ctx)?;
        let output = Output::from_context(ctx)?;

        let response = self.send_request(ctx, output.as_ref(), false).await?;
        let body = response.text().await.map_err(|e| LlmError::Provider {
            status: None,
            body: format!("failed to read response body: {e}"),
            retryable: true,
        })?;
        let api_response: crate::types::Response =
            serde_json::from_str(&body).map_err(|e| LlmError::ResponseFormat {
                message: format!("failed to parse OpenAI response: {e}"),
                raw: body.clone(),
            })?;

        convert::convert_response(api_response, output.as_ref())
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn stream(&self, ctx: &RequestContext) -> Result<DeltaStream, LlmError> {
        CAPABILITIES.check("openai", ctx)?;
        let output = Output::from_context(ctx)?;
        let response = self.send_request(ctx, output.as_ref(), true).await?;
        Ok(crate::stream::into_stream(response))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "openai".into(),
            model: self.config.model.clone(),
            capabilities: CAPABILITIES,
        }
    }
}

#[cfg(test)]
mod tests {
    use parley::provider::ToolDefinition;
    use parley::schema::TypeSpec;

    use super::*;

    #[test]
    fn test_metadata() {
        let provider = OpenAiProvider::new(OpenAiConfig {
            model: "gpt-4o-mini".into(),
            ..Default::default()
        });
        let meta = provider.metadata();

        assert_eq!(meta.name, "openai");
        assert_eq!(meta.model, "gpt-4o-mini");
        assert!(!meta.capabilities.additional_properties);
        assert!(meta.capabilities.requires_root_object);
        assert!(meta.capabilities.parallel_tools);
    }

    #[test]
    fn test_completions_url() {
        let provider = OpenAiProvider::new(OpenAiConfig::default());
        assert_eq!(
            provider.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );

        let provider = OpenAiProvider::new(OpenAiConfig {
            base_url: "http://localhost:8000/v1/".into(),
            ..Default::default()
        });
        assert_eq!(
            provider.completions_url(),
            "http://localhost:8000/v1/chat/completions"
        );
    }

    #[test]
    fn test_default_headers() {
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: "sk-test123".into(),
            organization: Some("org-abc".into()),
            ..Default::default()
        });
        let headers = provider.default_headers().unwrap();

        assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-test123");
        assert_eq!(headers.get("openai-organization").unwrap(), "org-abc");
    }

    #[test]
    fn test_default_headers_invalid_api_key() {
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: "bad\nkey".into(),
            ..Default::default()
        });
        assert!(matches!(
            provider.default_headers().unwrap_err(),
            LlmError::InvalidRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_additional_properties_rejected_before_network() {
        // Nothing listens on the discard port; reaching the network would
        // produce a provider error instead.
        let provider = OpenAiProvider::new(OpenAiConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..Default::default()
        });
        let ctx = RequestContext {
            turns: vec![Turn::user("hi")],
            tools: vec![ToolDefinition::new(
                "lookup",
                "Look something up",
                TypeSpec::object()
                    .field("q", TypeSpec::string())
                    .allow_additional()
                    .build(),
            )],
            ..Default::default()
        };

        let err = provider.send(&ctx).await.unwrap_err();
        assert!(matches!(err, LlmError::Capability { ref provider, .. } if provider == "openai"));
        let Err(err) = provider.stream(&ctx).await else {
            panic!("expected an error");
        };
        assert!(matches!(err, LlmError::Capability { .. }));
    }
}
