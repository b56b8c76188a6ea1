//! # parley
//!
//! A provider-agnostic chat engine for large language models.
//!
//! One [`Chat`] owns a conversation and drives it against any backend that
//! implements [`Provider`]: it sends the history, runs the tools the model
//! asks for, loops until the model answers, and appends the turns once the
//! exchange succeeds. The same engine streams text as it arrives and
//! extracts values shaped like a declared [`TypeSpec`].
//!
//! This crate contains **no** backend-specific code. Adapters live in
//! sibling crates:
//!
//! | Crate | Backend | Structured output |
//! |-------|---------|-------------------|
//! | `parley-anthropic` | Claude (Anthropic Messages API) | forced tool call |
//! | `parley-openai` | GPT (`OpenAI` Chat Completions) | `response_format` JSON schema |
//! | `parley-ollama` | Ollama (local) | `format` JSON schema |
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//!  │ parley-anthropic │ │  parley-openai  │ │  parley-ollama  │
//!  └────────┬─────────┘ └────────┬────────┘ └────────┬────────┘
//!           └─────────────┬──────┴───────────────────┘
//!                         ▼
//!  ┌────────────────────────────────────────────────────────┐
//!  │                        parley                          │
//!  │  engine ─► provider ─► stream ─► aggregate             │
//!  │    │                                                   │
//!  │    ├─► tool (registry, dispatcher)                     │
//!  │    └─► schema (TypeSpec, compile, parse)               │
//!  └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use parley::schema::TypeSpec;
//! use parley::Chat;
//!
//! # async fn example(provider: impl parley::Provider + 'static) -> Result<(), parley::LlmError> {
//! let mut chat = Chat::new(provider);
//! let reply = chat.chat("What is 1 + 1?", false).await?;
//!
//! let person = TypeSpec::object()
//!     .field("name", TypeSpec::string())
//!     .field("age", TypeSpec::integer())
//!     .build();
//! let value = chat.extract_data("Susan is 13 years old", &person).await?;
//! assert_eq!(value["age"], 13);
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`aggregate`] | Folds streamed deltas into a [`Turn`] |
//! | [`chat`] | Turns, content blocks, tool requests and results, the conversation |
//! | [`engine`] | The [`Chat`] engine and its state machine |
//! | [`error`] | Unified [`LlmError`] across the engine and all adapters |
//! | [`provider`] | The [`Provider`] trait, capabilities and request context |
//! | [`registry`] | Building providers by name from configuration |
//! | [`schema`] | [`TypeSpec`], JSON Schema compilation and value checking |
//! | [`stream`] | [`DeltaEvent`] and the stream aliases |
//! | [`tool`] | Tool handlers, registry and dispatcher |
//! | [`usage`] | Token counts |

#![warn(missing_docs)]

pub mod aggregate;
pub mod chat;
pub mod engine;
pub mod error;
pub mod provider;
pub mod registry;
pub mod schema;
pub mod stream;
pub mod tool;
pub mod usage;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

// ── Core re-exports ────────────────────────────────────────────────
//
// Only the types most programs touch live at the crate root:
//
//   parley::chat::*      ─ Media, ToolOutcome, Conversation
//   parley::provider::*  ─ Capabilities, ProviderMetadata
//   parley::schema::*    ─ compile, parse, CompiledSchema
//   parley::tool::*      ─ tool_fn, ToolRetryConfig, ToolLoopConfig
//   parley::mock::*      ─ MockProvider (test-utils feature)

pub use chat::{ContentBlock, Role, ToolRequest, ToolResult, Turn};
pub use engine::{Chat, ChatBuilder, EngineState, UserInput};
pub use error::LlmError;
pub use provider::{DynProvider, Provider, RequestContext, ToolDefinition};
pub use registry::ProviderRegistry;
pub use schema::TypeSpec;
pub use stream::{DeltaEvent, DeltaStream};
pub use tool::{ToolHandler, ToolRegistry};
pub use usage::Usage;
