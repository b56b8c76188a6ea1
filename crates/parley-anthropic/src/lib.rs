//! Anthropic Messages API adapter for `parley`.
//!
//! Implements [`Provider`](parley::Provider) on top of `POST /v1/messages`,
//! streaming included. Structured output is requested by forcing a call to
//! a single synthetic tool whose input schema is the compiled
//! [`TypeSpec`](parley::TypeSpec); non-object roots are wrapped in a
//! `data` field and unwrapped again on the way back.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use parley::Chat;
//! use parley_anthropic::{AnthropicConfig, AnthropicProvider};
//!
//! # async fn example() -> Result<(), parley::LlmError> {
//! let provider = AnthropicProvider::new(AnthropicConfig {
//!     api_key: std::env::var("ANTHROPIC_API_KEY").unwrap(),
//!     ..Default::default()
//! });
//!
//! let mut chat = Chat::builder(provider)
//!     .system_prompt("Answer in one sentence.")
//!     .build();
//! println!("{}", chat.chat("Why is the sky blue?", false).await?);
//! # Ok(())
//! # }
//! ```
//!
//! Streaming a request that carries an output spec is rejected with
//! [`LlmError::InvalidRequest`](parley::LlmError::InvalidRequest); the
//! engine never does it.

#![warn(missing_docs)]

mod config;
mod convert;
mod factory;
mod provider;
mod stream;
mod types;

pub use config::AnthropicConfig;
pub use factory::{AnthropicFactory, register_global};
pub use provider::AnthropicProvider;
