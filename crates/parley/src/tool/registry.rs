//! Tool registry and dispatcher.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use super::{ToolError, ToolHandler, ToolRetryConfig};
use crate::chat::{ToolRequest, ToolResult};
use crate::error::LlmError;
use crate::provider::ToolDefinition;
use crate::schema;

#[derive(Clone)]
struct Entry {
    handler: Arc<dyn ToolHandler>,
    definition: ToolDefinition,
    retry: Option<ToolRetryConfig>,
}

/// A registry of tool handlers, indexed by name.
///
/// Validates each request's arguments against the tool's parameter spec
/// before running the handler, and runs a turn's requests concurrently.
/// Definitions are read-only once registered, so concurrent calls share
/// them freely.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field(
                "tools",
                &self
                    .entries
                    .iter()
                    .map(|e| e.definition.name.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool handler.
    ///
    /// The parameter spec must be a well-formed object spec. A handler
    /// with the same name replaces the earlier one, keeping its position.
    pub fn register(&mut self, handler: impl ToolHandler + 'static) -> Result<&mut Self, LlmError> {
        self.insert(Arc::new(handler), None)
    }

    /// Registers a handler that is retried on failure.
    pub fn register_with_retry(
        &mut self,
        handler: impl ToolHandler + 'static,
        retry: ToolRetryConfig,
    ) -> Result<&mut Self, LlmError> {
        self.insert(Arc::new(handler), Some(retry))
    }

    /// Registers a shared handler.
    pub fn register_shared(&mut self, handler: Arc<dyn ToolHandler>) -> Result<&mut Self, LlmError> {
        self.insert(handler, None)
    }

    fn insert(
        &mut self,
        handler: Arc<dyn ToolHandler>,
        retry: Option<ToolRetryConfig>,
    ) -> Result<&mut Self, LlmError> {
        let definition = handler.definition();
        if definition.name.is_empty() {
            return Err(LlmError::InvalidRequest("tool name must not be empty".into()));
        }
        if !definition.parameters.is_object() {
            return Err(LlmError::InvalidRequest(format!(
                "parameters of tool '{}' must be an object spec",
                definition.name
            )));
        }
        definition.parameters.check()?;

        let entry = Entry {
            handler,
            definition,
            retry,
        };
        match self.index.get(&entry.definition.name) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index
                    .insert(entry.definition.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
        Ok(self)
    }

    /// Returns the handler for the given tool name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.index.get(name).map(|&i| &self.entries[i].handler)
    }

    /// Returns whether a tool with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Definitions of all registered tools, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }

    /// Returns the number of registered tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs one tool request. Never fails at the outer level: every
    /// problem becomes an error result carrying the request's id.
    ///
    /// 1. Malformed arguments → error result, handler not called.
    /// 2. Unknown tool → `unknown tool: <name>`, nothing called.
    /// 3. Arguments that do not satisfy the parameter spec → error result.
    /// 4. Otherwise the handler runs, retried if configured. A handler
    ///    that panics yields `tool panicked: <message>`.
    pub async fn execute(&self, request: &ToolRequest) -> ToolResult {
        if let Some(reason) = &request.malformed {
            return ToolResult::error(&request.id, reason.clone());
        }
        let Some(&i) = self.index.get(&request.name) else {
            tracing::warn!(tool = %request.name, id = %request.id, "model requested unknown tool");
            return ToolResult::error(&request.id, format!("unknown tool: {}", request.name));
        };
        let entry = &self.entries[i];

        let arguments = match schema::parse(request.arguments.clone(), &entry.definition.parameters)
        {
            Ok(args) => args,
            Err(e) => {
                return ToolResult::error(
                    &request.id,
                    format!("invalid arguments for tool '{}': {e}", request.name),
                );
            }
        };

        tracing::debug!(tool = %request.name, id = %request.id, is_async = entry.handler.is_async(), "executing tool");
        let run = async {
            match &entry.retry {
                Some(retry) => run_with_retry(entry.handler.as_ref(), arguments, retry).await,
                None => entry.handler.execute(arguments).await,
            }
        };
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(value)) => ToolResult::ok(&request.id, value),
            Ok(Err(e)) => {
                tracing::debug!(tool = %request.name, id = %request.id, error = %e, "tool failed");
                ToolResult::error(&request.id, e.message)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(tool = %request.name, id = %request.id, panic = %message, "tool panicked");
                ToolResult::error(&request.id, format!("tool panicked: {message}"))
            }
        }
    }

    /// Runs every request of one turn and waits for all of them.
    ///
    /// Returns exactly one result per request, in request order, each
    /// carrying its request's id. With `parallel` the calls run
    /// concurrently; otherwise one after another.
    pub async fn dispatch(&self, requests: &[ToolRequest], parallel: bool) -> Vec<ToolResult> {
        if !parallel || requests.len() <= 1 {
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                results.push(self.execute(request).await);
            }
            return results;
        }
        futures::future::join_all(requests.iter().map(|r| self.execute(r))).await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

async fn run_with_retry(
    handler: &dyn ToolHandler,
    arguments: Value,
    config: &ToolRetryConfig,
) -> Result<Value, ToolError> {
    let mut attempt = 0u32;
    loop {
        match handler.execute(arguments.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_retries && config.should_retry(&e.message) => {
                tokio::time::sleep(config.backoff(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
