//! Rebuilds a [`Turn`] from a stream of [`DeltaEvent`]s.
//!
//! The [`Aggregator`] is a push-driven state machine: feed it events in
//! order and it hands back each text fragment to forward to the caller,
//! while building the final turn on the side. Reconstruction rules:
//!
//! - consecutive text deltas extend one `Text` block; any tool-call event
//!   closes it, so text after a tool call starts a new block;
//! - a tool call opens on `ToolCallStart` or on the first `ToolCallDelta`
//!   with an unseen id, and its argument text is parsed as JSON when
//!   `ToolCallComplete` arrives. A parse failure is recorded on the
//!   [`ToolRequest`] so the dispatcher can answer it with an error result;
//! - usage deltas add up.
//!
//! Because the forwarded fragments and the text blocks are built from the
//! same deltas, their concatenations are always equal.

use futures::StreamExt;

use crate::chat::{ContentBlock, Role, ToolRequest, Turn};
use crate::error::LlmError;
use crate::stream::{DeltaEvent, DeltaStream};
use crate::usage::Usage;

#[derive(Debug)]
enum Slot {
    Text(String),
    Call {
        id: String,
        name: String,
        arguments: String,
        request: Option<ToolRequest>,
    },
}

/// Incremental builder for one assistant turn.
#[derive(Debug, Default)]
pub struct Aggregator {
    slots: Vec<Slot>,
    text_open: bool,
    usage: Usage,
    complete: bool,
}

impl Aggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event.
    ///
    /// Returns the text fragment to forward, if the event carried one.
    /// Events after `TurnComplete` are a protocol violation.
    pub fn push(&mut self, event: DeltaEvent) -> Result<Option<String>, LlmError> {
        if self.complete {
            return Err(LlmError::ResponseFormat {
                message: "delta received after TurnComplete".into(),
                raw: format!("{event:?}"),
            });
        }
        match event {
            DeltaEvent::TextDelta { text } => {
                if text.is_empty() {
                    return Ok(None);
                }
                match self.slots.last_mut() {
                    Some(Slot::Text(buf)) if self.text_open => buf.push_str(&text),
                    _ => {
                        self.slots.push(Slot::Text(text.clone()));
                        self.text_open = true;
                    }
                }
                return Ok(Some(text));
            }
            DeltaEvent::ToolCallStart { id, name } => {
                self.text_open = false;
                match self.call_mut(&id) {
                    Some(Slot::Call { name: existing, .. }) => *existing = name,
                    _ => self.open_call(id, name),
                }
            }
            DeltaEvent::ToolCallDelta {
                id,
                partial_arguments,
            } => {
                self.text_open = false;
                if self.call_mut(&id).is_none() {
                    self.open_call(id.clone(), String::new());
                }
                if let Some(Slot::Call { arguments, .. }) = self.call_mut(&id) {
                    arguments.push_str(&partial_arguments);
                }
            }
            DeltaEvent::ToolCallComplete { id } => {
                self.text_open = false;
                match self.call_mut(&id) {
                    Some(slot) => Self::close_call(slot),
                    None => {
                        tracing::warn!(id = %id, "ToolCallComplete for unknown tool call");
                        self.open_call(id.clone(), String::new());
                        if let Some(slot) = self.call_mut(&id) {
                            Self::close_call(slot);
                        }
                    }
                }
            }
            DeltaEvent::UsageDelta {
                tokens_in,
                tokens_out,
            } => self.usage += Usage::new(tokens_in, tokens_out),
            DeltaEvent::TurnComplete => {
                for slot in &mut self.slots {
                    if matches!(slot, Slot::Call { request: None, .. }) {
                        tracing::debug!("closing tool call left open at TurnComplete");
                        Self::close_call(slot);
                    }
                }
                self.complete = true;
            }
        }
        Ok(None)
    }

    fn open_call(&mut self, id: String, name: String) {
        self.slots.push(Slot::Call {
            id,
            name,
            arguments: String::new(),
            request: None,
        });
    }

    fn call_mut(&mut self, wanted: &str) -> Option<&mut Slot> {
        self.slots
            .iter_mut()
            .find(|s| matches!(s, Slot::Call { id, .. } if id == wanted))
    }

    fn close_call(slot: &mut Slot) {
        if let Slot::Call {
            id,
            name,
            arguments,
            request,
        } = slot
        {
            if request.is_none() {
                let parsed = ToolRequest::from_raw(id.clone(), name.clone(), arguments);
                if let Some(reason) = &parsed.malformed {
                    tracing::warn!(id = %id, tool = %name, %reason, "malformed tool call");
                }
                *request = Some(parsed);
            }
        }
    }

    /// Whether `TurnComplete` has been seen.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Usage accumulated so far.
    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Produces the assistant turn.
    ///
    /// Fails if the stream ended without `TurnComplete`.
    pub fn finish(self) -> Result<Turn, LlmError> {
        if !self.complete {
            return Err(LlmError::ResponseFormat {
                message: "stream ended before TurnComplete".into(),
                raw: String::new(),
            });
        }
        let blocks = self
            .slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Text(text) => Some(ContentBlock::Text { text }),
                Slot::Call { request, .. } => request.map(ContentBlock::ToolRequest),
            })
            .collect();
        Ok(Turn::new(Role::Assistant, blocks).with_usage(self.usage))
    }
}

/// Drains a stream into a turn, handing every text fragment to `on_text`
/// as it arrives.
pub async fn collect_with<F>(mut stream: DeltaStream, mut on_text: F) -> Result<Turn, LlmError>
where
    F: FnMut(&str),
{
    let mut aggregator = Aggregator::new();
    while let Some(event) = stream.next().await {
        if let Some(fragment) = aggregator.push(event?)? {
            on_text(&fragment);
        }
        if aggregator.is_complete() {
            break;
        }
    }
    aggregator.finish()
}

/// Drains a stream into a turn.
pub async fn collect(stream: DeltaStream) -> Result<Turn, LlmError> {
    collect_with(stream, |_| {}).await
}
