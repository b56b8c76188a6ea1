//! Streaming delta types.
//!
//! When a provider streams its response it yields [`DeltaEvent`]s through
//! a [`DeltaStream`], in the order the server emitted them. Every stream
//! ends with one [`TurnComplete`](DeltaEvent::TurnComplete), or with an
//! error.
//!
//! # Tool-call reassembly
//!
//! Tool calls arrive in up to three phases, keyed by `id`:
//! 1. [`ToolCallStart`](DeltaEvent::ToolCallStart) announces the tool name.
//! 2. [`ToolCallDelta`](DeltaEvent::ToolCallDelta) carries argument text
//!    fragments.
//! 3. [`ToolCallComplete`](DeltaEvent::ToolCallComplete) closes the call.
//!
//! The [`Aggregator`](crate::aggregate::Aggregator) stitches these into
//! [`ToolRequest`](crate::chat::ToolRequest) blocks.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// A pinned, boxed, `Send` stream of [`DeltaEvent`] results.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<DeltaEvent, LlmError>> + Send>>;

/// A lazy stream of text fragments, as handed to callers of
/// [`Chat::stream`](crate::engine::Chat::stream).
pub type TextStream<'a> = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send + 'a>>;

/// An incremental event emitted during a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DeltaEvent {
    /// A fragment of the model's text.
    TextDelta {
        /// The fragment.
        text: String,
    },
    /// A tool call has begun.
    ToolCallStart {
        /// Provider-assigned call id.
        id: String,
        /// Name of the tool being called.
        name: String,
    },
    /// A fragment of a tool call's JSON arguments.
    ToolCallDelta {
        /// The call this fragment belongs to.
        id: String,
        /// Raw argument text, to be concatenated.
        partial_arguments: String,
    },
    /// All argument fragments for the call have been sent.
    ToolCallComplete {
        /// The call that finished.
        id: String,
    },
    /// Token usage so far. Later events add to earlier ones.
    UsageDelta {
        /// Input tokens reported by this event.
        tokens_in: u64,
        /// Output tokens reported by this event.
        tokens_out: u64,
    },
    /// The response is over.
    TurnComplete,
}

impl DeltaEvent {
    /// Shorthand for a text delta.
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }
}
