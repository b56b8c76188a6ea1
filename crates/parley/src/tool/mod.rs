//! Tool registration and dispatch.
//!
//! Tools are caller-supplied functions the model may invoke mid-conversation.
//! Their inputs and outputs are plain JSON values.
//!
//! # Architecture
//!
//! ```text
//!   ToolHandler    ─ one tool: definition + execute fn
//!       │
//!   ToolRegistry   ─ stores handlers by name, validates arguments,
//!       │            runs a turn's requests concurrently
//!       │
//!   Chat           ─ loops send → dispatch → send until the model
//!                    stops asking for tools (see ToolLoopConfig)
//! ```
//!
//! Handler failures never escape the dispatcher: they come back as
//! [`ToolResult`](crate::chat::ToolResult)s carrying an error, which the
//! engine sends to the model like any other result.
//!
//! # Example
//!
//! ```rust
//! use parley::schema::TypeSpec;
//! use parley::tool::{ToolRegistry, tool_fn};
//! use parley::ToolDefinition;
//! use serde_json::Value;
//!
//! let mut registry = ToolRegistry::new();
//! registry
//!     .register(tool_fn(
//!         ToolDefinition::new(
//!             "add",
//!             "Add two integers",
//!             TypeSpec::object()
//!                 .field("a", TypeSpec::integer())
//!                 .field("b", TypeSpec::integer())
//!                 .build(),
//!         ),
//!         |input: Value| async move {
//!             Ok(input["a"].as_i64().unwrap_or(0) + input["b"].as_i64().unwrap_or(0))
//!         },
//!     ))
//!     .expect("valid definition");
//! assert!(registry.contains("add"));
//! ```

mod config;
mod error;
mod handler;
mod registry;

pub use config::{ToolLoopConfig, ToolRetryConfig};
pub use error::ToolError;
pub use handler::{BlockingToolHandler, FnToolHandler, ToolHandler, tool_fn, tool_fn_blocking};
pub use registry::ToolRegistry;
