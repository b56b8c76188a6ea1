//! Tool handler trait and closure-backed implementations.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::ToolError;
use crate::provider::ToolDefinition;

/// A single tool that can be invoked by the model.
///
/// Implement this for tools with their own state; wrap closures with
/// [`tool_fn`] or [`tool_fn_blocking`] otherwise. Object safe, so handlers
/// are stored as `Arc<dyn ToolHandler>`.
pub trait ToolHandler: Send + Sync {
    /// Returns the tool's definition (name, description, parameter spec).
    fn definition(&self) -> ToolDefinition;

    /// Whether the handler suspends instead of blocking its thread.
    ///
    /// Blocking handlers must move their work off the async executor
    /// themselves; [`tool_fn_blocking`] does this with
    /// `tokio::task::spawn_blocking`.
    fn is_async(&self) -> bool {
        true
    }

    /// Runs the tool with already-validated JSON arguments.
    fn execute<'a>(
        &'a self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;
}

/// A tool backed by an async closure. Created by [`tool_fn`].
pub struct FnToolHandler<F> {
    definition: ToolDefinition,
    handler: F,
}

impl<F> std::fmt::Debug for FnToolHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnToolHandler")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

impl<F, Fut, O> ToolHandler for FnToolHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Serialize + Send + 'static,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn execute<'a>(
        &'a self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>> {
        let fut = (self.handler)(input);
        Box::pin(async move { Ok(serde_json::to_value(fut.await?)?) })
    }
}

/// A tool backed by a synchronous closure. Created by [`tool_fn_blocking`].
///
/// Each call runs on tokio's blocking pool so a slow handler never stalls
/// the other calls of the same turn.
pub struct BlockingToolHandler<F> {
    definition: ToolDefinition,
    handler: Arc<F>,
}

impl<F> std::fmt::Debug for BlockingToolHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingToolHandler")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

impl<F, O> ToolHandler for BlockingToolHandler<F>
where
    F: Fn(Value) -> Result<O, ToolError> + Send + Sync + 'static,
    O: Serialize + Send + 'static,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn is_async(&self) -> bool {
        false
    }

    fn execute<'a>(
        &'a self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>> {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            let output = tokio::task::spawn_blocking(move || handler(input))
                .await
                .map_err(|e| ToolError::new(format!("tool task failed: {e}")))??;
            Ok(serde_json::to_value(output)?)
        })
    }
}

/// Creates a [`ToolHandler`] from an async closure.
///
/// The closure receives the validated JSON arguments and returns any
/// `Serialize` value, which becomes the tool result.
pub fn tool_fn<F, Fut, O>(definition: ToolDefinition, handler: F) -> FnToolHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Serialize + Send + 'static,
{
    FnToolHandler {
        definition,
        handler,
    }
}

/// Creates a [`ToolHandler`] from a synchronous, possibly blocking closure.
pub fn tool_fn_blocking<F, O>(definition: ToolDefinition, handler: F) -> BlockingToolHandler<F>
where
    F: Fn(Value) -> Result<O, ToolError> + Send + Sync + 'static,
    O: Serialize + Send + 'static,
{
    BlockingToolHandler {
        definition,
        handler: Arc::new(handler),
    }
}
