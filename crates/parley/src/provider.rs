//! Provider adapter trait and the per-call request context.
//!
//! This module defines two core abstractions:
//!
//! - **[`Provider`]**: the trait every backend implements. It uses
//!   native async-fn-in-traits, so implementations are plain `async fn`s.
//!
//! - **[`DynProvider`]**: an object-safe mirror of `Provider` that uses
//!   boxed futures. A blanket `impl<T: Provider> DynProvider for T`
//!   bridges the two, which is how the [`Chat`](crate::engine::Chat)
//!   engine stores whichever backend it was built with.
//!
//! # Capabilities
//!
//! Backends disagree on what a request may contain. Each adapter
//! describes itself with [`Capabilities`], and calls
//! [`Capabilities::check`] before touching the network so an
//! unsupported request fails with [`LlmError::Capability`] at no cost.

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chat::{ContentBlock, Turn};
use crate::error::LlmError;
use crate::schema::TypeSpec;
use crate::stream::DeltaStream;

/// The trait every provider adapter implements.
///
/// `Provider` is **not** object-safe because AFIT returns `impl Future`.
/// Use [`DynProvider`] for `Box<dyn _>` storage; every `Provider`
/// implements it automatically.
pub trait Provider: Send + Sync {
    /// Sends one request and returns the complete assistant turn.
    fn send(&self, ctx: &RequestContext) -> impl Future<Output = Result<Turn, LlmError>> + Send;

    /// Sends one request and returns its deltas as they arrive.
    ///
    /// The stream ends with exactly one
    /// [`TurnComplete`](crate::stream::DeltaEvent::TurnComplete) or an
    /// error. Dropping it cancels the underlying request.
    fn stream(
        &self,
        ctx: &RequestContext,
    ) -> impl Future<Output = Result<DeltaStream, LlmError>> + Send;

    /// Returns static metadata describing this provider instance.
    fn metadata(&self) -> ProviderMetadata;
}

/// Object-safe counterpart of [`Provider`] for dynamic dispatch.
pub trait DynProvider: Send + Sync {
    /// Boxed-future version of [`Provider::send`].
    fn send_boxed<'a>(
        &'a self,
        ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<Turn, LlmError>> + Send + 'a>>;

    /// Boxed-future version of [`Provider::stream`].
    fn stream_boxed<'a>(
        &'a self,
        ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream, LlmError>> + Send + 'a>>;

    /// Returns static metadata describing this provider instance.
    fn metadata(&self) -> ProviderMetadata;
}

impl<T: Provider> DynProvider for T {
    fn send_boxed<'a>(
        &'a self,
        ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<Turn, LlmError>> + Send + 'a>> {
        Box::pin(self.send(ctx))
    }

    fn stream_boxed<'a>(
        &'a self,
        ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream, LlmError>> + Send + 'a>> {
        Box::pin(self.stream(ctx))
    }

    fn metadata(&self) -> ProviderMetadata {
        Provider::metadata(self)
    }
}

/// Describes a provider instance: its name, model, and capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Provider name (e.g. `"anthropic"`).
    pub name: Cow<'static, str>,
    /// The model identifier.
    pub model: String,
    /// What request shapes this backend can express.
    pub capabilities: Capabilities,
}

/// What a backend's wire dialect can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// The model may request several tools in one turn.
    pub parallel_tools: bool,
    /// Object schemas may permit keys beyond the declared ones.
    pub additional_properties: bool,
    /// Structured-output schemas must have an object at the root.
    pub requires_root_object: bool,
    /// Document (PDF) blocks are accepted.
    pub documents: bool,
    /// Images may be passed by URL rather than inline.
    pub remote_images: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            parallel_tools: true,
            additional_properties: false,
            requires_root_object: false,
            documents: false,
            remote_images: false,
        }
    }
}

impl Capabilities {
    /// Rejects request shapes this backend cannot express.
    ///
    /// `provider` names the backend in the error. Runs before any network
    /// call.
    pub fn check(&self, provider: &str, ctx: &RequestContext) -> Result<(), LlmError> {
        let reject = |message: String| LlmError::Capability {
            provider: provider.to_owned(),
            message,
        };

        if !self.additional_properties {
            if ctx.output.as_ref().is_some_and(TypeSpec::allows_additional) {
                return Err(reject(
                    "structured output spec allows additional properties".into(),
                ));
            }
            if let Some(tool) = ctx
                .tools
                .iter()
                .find(|t| t.parameters.allows_additional())
            {
                return Err(reject(format!(
                    "parameters of tool '{}' allow additional properties",
                    tool.name
                )));
            }
        }

        for block in ctx.turns.iter().flat_map(|t| &t.blocks) {
            match block {
                ContentBlock::Document(_) if !self.documents => {
                    return Err(reject("document content is not supported".into()));
                }
                ContentBlock::Image(media) if media.is_remote() && !self.remote_images => {
                    return Err(reject(
                        "images must be inline; remote image URLs are not supported".into(),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// A tool the model may invoke.
///
/// Providers translate this into their native tool format. The handler
/// itself lives in the [`ToolRegistry`](crate::tool::ToolRegistry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Tells the model when to use the tool.
    pub description: String,
    /// Shape of the arguments. Must be an object spec.
    pub parameters: TypeSpec,
}

impl ToolDefinition {
    /// Creates a definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: TypeSpec,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Everything an adapter needs for one call, built fresh by the engine
/// and never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestContext {
    /// History, oldest first. Ends with the turn the model should answer.
    pub turns: Vec<Turn>,
    /// System prompt.
    pub system: Option<String>,
    /// Tools the model may call.
    pub tools: Vec<ToolDefinition>,
    /// When set, the model must answer with a value of this shape.
    pub output: Option<TypeSpec>,
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Per-request timeout, passed through to the transport.
    pub timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{Media, Role};

    fn ctx_with(blocks: Vec<ContentBlock>) -> RequestContext {
        RequestContext {
            turns: vec![Turn::new(Role::User, blocks)],
            ..Default::default()
        }
    }

    #[test]
    fn test_capability_check_passes_plain_request() {
        let ctx = ctx_with(vec![ContentBlock::text("hi")]);
        assert!(Capabilities::default().check("p", &ctx).is_ok());
    }

    #[test]
    fn test_capability_rejects_additional_properties_output() {
        let ctx = RequestContext {
            output: Some(TypeSpec::object().allow_additional().build()),
            ..Default::default()
        };
        let err = Capabilities::default().check("openai", &ctx).unwrap_err();
        assert!(matches!(err, LlmError::Capability { provider, .. } if provider == "openai"));

        let permissive = Capabilities {
            additional_properties: true,
            ..Default::default()
        };
        assert!(permissive.check("anthropic", &ctx).is_ok());
    }

    #[test]
    fn test_capability_rejects_additional_properties_tool() {
        let ctx = RequestContext {
            tools: vec![ToolDefinition::new(
                "free",
                "anything goes",
                TypeSpec::object().allow_additional().build(),
            )],
            ..Default::default()
        };
        let err = Capabilities::default().check("p", &ctx).unwrap_err();
        assert!(err.to_string().contains("'free'"));
    }

    #[test]
    fn test_capability_rejects_documents_and_remote_images() {
        let doc = ctx_with(vec![ContentBlock::Document(Media::from_bytes(
            b"%PDF",
            "application/pdf",
        ))]);
        assert!(Capabilities::default().check("p", &doc).is_err());

        let remote = ctx_with(vec![ContentBlock::Image(Media::url(
            "https://example.com/a.png",
            "image/png",
        ))]);
        assert!(Capabilities::default().check("p", &remote).is_err());

        let inline = ctx_with(vec![ContentBlock::Image(Media::from_bytes(
            [0u8; 4],
            "image/png",
        ))]);
        assert!(Capabilities::default().check("p", &inline).is_ok());
    }

    #[test]
    fn test_provider_is_object_safe() {
        let f: fn(&dyn DynProvider) = |_| {};
        let _ = f;
    }
}
