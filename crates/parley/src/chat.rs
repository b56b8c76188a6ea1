//! Conversation content: roles, content blocks, turns and the
//! append-only conversation that owns them.
//!
//! A [`Turn`] is one role-tagged batch of [`ContentBlock`]s plus the token
//! usage of the round-trip that produced it. Turns are immutable once
//! appended to a [`Conversation`]; the conversation exposes no API to edit
//! or remove them.
//!
//! # Tool-call bookkeeping
//!
//! Every [`ToolResult`] must answer exactly one earlier, still unanswered
//! [`ToolRequest`]. [`Conversation::push`] enforces this, so a history that
//! made it into a conversation is always one a provider will accept.

use std::collections::HashSet;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LlmError;
use crate::schema::TypeSpec;
use crate::usage::Usage;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human, or tool results sent back on their behalf.
    User,
    /// The model.
    Assistant,
    /// Instructions that frame the conversation.
    System,
}

/// Where the bytes of an image or document live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSource {
    /// Inline data, base64-encoded.
    Base64(String),
    /// A remote URL the provider fetches itself.
    Url(String),
}

/// An image or document attached to a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    /// The data or its location.
    pub source: MediaSource,
    /// MIME type, e.g. `image/png` or `application/pdf`.
    pub mime_type: String,
}

impl Media {
    /// Inline media from raw bytes.
    pub fn from_bytes(bytes: impl AsRef<[u8]>, mime_type: impl Into<String>) -> Self {
        Self {
            source: MediaSource::Base64(base64::engine::general_purpose::STANDARD.encode(bytes)),
            mime_type: mime_type.into(),
        }
    }

    /// Remote media.
    pub fn url(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            source: MediaSource::Url(url.into()),
            mime_type: mime_type.into(),
        }
    }

    /// Whether the provider must fetch the data itself.
    pub fn is_remote(&self) -> bool {
        matches!(self.source, MediaSource::Url(_))
    }
}

/// A model's request to invoke a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Provider-assigned id; the matching result carries the same id.
    pub id: String,
    /// Name of the registered tool.
    pub name: String,
    /// Parsed JSON arguments. `Value::Null` when `malformed` is set.
    pub arguments: Value,
    /// Why the streamed arguments could not be parsed, if they could not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malformed: Option<String>,
}

impl ToolRequest {
    /// A well-formed request.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            malformed: None,
        }
    }

    /// Parses raw argument text, recording a parse failure instead of
    /// returning it.
    ///
    /// Empty text is treated as `{}`: providers send nothing for
    /// zero-argument calls.
    pub fn from_raw(id: impl Into<String>, name: impl Into<String>, raw: &str) -> Self {
        let id = id.into();
        let parsed = if raw.trim().is_empty() {
            Ok(Value::Object(serde_json::Map::new()))
        } else {
            serde_json::from_str(raw)
        };
        match parsed {
            Ok(arguments) => Self::new(id, name, arguments),
            Err(e) => {
                let err = LlmError::MalformedToolCall {
                    id: id.clone(),
                    message: e.to_string(),
                    raw: raw.to_owned(),
                };
                Self {
                    id,
                    name: name.into(),
                    arguments: Value::Null,
                    malformed: Some(err.to_string()),
                }
            }
        }
    }
}

/// How a tool call ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The handler's return value.
    Value(Value),
    /// Why the call failed.
    Error(String),
}

/// The answer to one [`ToolRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the request this answers.
    pub id: String,
    /// The handler's value or error.
    pub outcome: ToolOutcome,
}

impl ToolResult {
    /// A successful result.
    pub fn ok(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            outcome: ToolOutcome::Value(value),
        }
    }

    /// A failed result.
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: ToolOutcome::Error(message.into()),
        }
    }

    /// Whether the call failed.
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error(_))
    }

    /// The successful value, if any.
    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            ToolOutcome::Value(v) => Some(v),
            ToolOutcome::Error(_) => None,
        }
    }

    /// Text form sent back to providers: strings verbatim, other values
    /// as compact JSON, errors as their message.
    pub fn content_text(&self) -> String {
        match &self.outcome {
            ToolOutcome::Value(Value::String(s)) => s.clone(),
            ToolOutcome::Value(v) => v.to_string(),
            ToolOutcome::Error(msg) => msg.clone(),
        }
    }
}

/// One unit of turn content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// An image.
    Image(Media),
    /// A document such as a PDF.
    Document(Media),
    /// A tool invocation requested by the model.
    ToolRequest(ToolRequest),
    /// The outcome of a tool invocation.
    ToolResult(ToolResult),
    /// A value extracted against a [`TypeSpec`].
    StructuredOutput {
        /// The extracted value, already stripped of any provider wrapper.
        value: Value,
        /// The spec the value was requested against.
        spec: TypeSpec,
    },
}

impl ContentBlock {
    /// Shorthand for a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns the text if this is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// One role-tagged, ordered batch of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced the turn.
    pub role: Role,
    /// Content in emission order.
    pub blocks: Vec<ContentBlock>,
    /// Tokens spent on the round-trip that produced this turn.
    #[serde(default)]
    pub usage: Usage,
}

impl Turn {
    /// A turn with the given role and blocks and zero usage.
    pub fn new(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            blocks,
            usage: Usage::default(),
        }
    }

    /// A single-text user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    /// A single-text assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::text(text)])
    }

    /// A single-text system turn.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentBlock::text(text)])
    }

    /// Sets the usage record.
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Input tokens.
    pub fn tokens_in(&self) -> u64 {
        self.usage.input_tokens
    }

    /// Output tokens.
    pub fn tokens_out(&self) -> u64 {
        self.usage.output_tokens
    }

    /// Concatenation of every text block.
    pub fn text(&self) -> String {
        self.blocks.iter().filter_map(ContentBlock::as_text).collect()
    }

    /// The tool requests in this turn, in order.
    pub fn tool_requests(&self) -> impl Iterator<Item = &ToolRequest> {
        self.blocks.iter().filter_map(|b| match b {
            ContentBlock::ToolRequest(r) => Some(r),
            _ => None,
        })
    }

    /// The tool results in this turn, in order.
    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.blocks.iter().filter_map(|b| match b {
            ContentBlock::ToolResult(r) => Some(r),
            _ => None,
        })
    }

    /// Whether the model asked for any tool.
    pub fn has_tool_requests(&self) -> bool {
        self.tool_requests().next().is_some()
    }

    /// The first structured-output value, if any.
    pub fn structured_output(&self) -> Option<&Value> {
        self.blocks.iter().find_map(|b| match b {
            ContentBlock::StructuredOutput { value, .. } => Some(value),
            _ => None,
        })
    }
}

/// The ordered, append-only history of one chat.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    turns: Vec<Turn>,
    pending: HashSet<String>,
}

impl Conversation {
    /// An empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a conversation from saved turns, checking tool-call pairing.
    pub fn from_turns(turns: impl IntoIterator<Item = Turn>) -> Result<Self, LlmError> {
        let mut conversation = Self::new();
        conversation.extend(turns)?;
        Ok(conversation)
    }

    /// Appends a turn.
    ///
    /// Fails without modifying the conversation if any tool result in the
    /// turn does not answer an outstanding request.
    pub fn push(&mut self, turn: Turn) -> Result<(), LlmError> {
        let pending = Self::advance(&self.pending, &turn)?;
        self.pending = pending;
        self.turns.push(turn);
        Ok(())
    }

    /// Appends several turns atomically: either all are appended or none.
    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) -> Result<(), LlmError> {
        let turns: Vec<Turn> = turns.into_iter().collect();
        let mut pending = self.pending.clone();
        for turn in &turns {
            pending = Self::advance(&pending, turn)?;
        }
        self.pending = pending;
        self.turns.extend(turns);
        Ok(())
    }

    fn advance(pending: &HashSet<String>, turn: &Turn) -> Result<HashSet<String>, LlmError> {
        let mut next = pending.clone();
        for block in &turn.blocks {
            match block {
                ContentBlock::ToolRequest(req) => {
                    next.insert(req.id.clone());
                }
                ContentBlock::ToolResult(res) => {
                    if !next.remove(&res.id) {
                        return Err(LlmError::InvalidRequest(format!(
                            "tool result '{}' does not answer an outstanding tool request",
                            res.id
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(next)
    }

    /// All turns, oldest first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The most recent turn.
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// The most recent turn with the given role.
    pub fn last_by(&self, role: Role) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.role == role)
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no turn has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Sum of every turn's usage.
    pub fn total_usage(&self) -> Usage {
        self.turns.iter().fold(Usage::default(), |acc, t| acc + t.usage)
    }

    /// Ids of tool requests still waiting for a result.
    pub fn pending_tool_requests(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }
}
