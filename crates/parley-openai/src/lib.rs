//! `OpenAI` Chat Completions adapter for `parley`.
//!
//! Implements [`Provider`](parley::Provider) on top of
//! `POST /chat/completions`, streaming included. Structured output uses
//! `response_format` with a JSON schema; the API requires an object at the
//! root, so other roots are wrapped in a `data` field and unwrapped again
//! on the way back.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use parley::{Chat, TypeSpec};
//! use parley_openai::{OpenAiConfig, OpenAiProvider};
//!
//! # async fn example() -> Result<(), parley::LlmError> {
//! let provider = OpenAiProvider::new(OpenAiConfig {
//!     api_key: std::env::var("OPENAI_API_KEY").unwrap(),
//!     model: "gpt-4o-mini".into(),
//!     ..Default::default()
//! });
//!
//! let mut chat = Chat::new(provider);
//! let person = TypeSpec::object()
//!     .field("name", TypeSpec::string())
//!     .field("age", TypeSpec::integer())
//!     .build();
//! let value = chat.extract_data("Susan is 13.", &person).await?;
//! println!("{value}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod convert;
mod factory;
mod provider;
mod stream;
mod types;

pub use config::OpenAiConfig;
pub use factory::{OpenAiFactory, register_global};
pub use provider::OpenAiProvider;
