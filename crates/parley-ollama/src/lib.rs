//! Ollama adapter for `parley`.
//!
//! Implements [`Provider`](parley::Provider) against a local Ollama
//! server's `/api/chat` endpoint. Streaming uses JSON Lines. Structured
//! output passes the compiled schema as `format`, which accepts any root
//! type, so nothing is wrapped.
//!
//! Ollama does not assign tool call ids; this adapter numbers them
//! `call_{name}_{n}` within each reply.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use parley::Chat;
//! use parley_ollama::{OllamaConfig, OllamaProvider};
//!
//! # async fn example() -> Result<(), parley::LlmError> {
//! let provider = OllamaProvider::new(OllamaConfig {
//!     model: "llama3.2".into(),
//!     ..Default::default()
//! });
//!
//! let mut chat = Chat::new(provider);
//! let answer = chat.chat("Hello!", false).await?;
//! println!("{answer}");
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

pub use config::OllamaConfig;
pub use factory::{OllamaFactory, register_global};
pub use provider::OllamaProvider;
