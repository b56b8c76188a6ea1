//! The chat engine: owns the conversation and drives the provider round-trip.
//!
//! [`Chat`] ties the other modules together. Each public operation builds a
//! fresh [`RequestContext`] from the conversation, calls the provider,
//! dispatches any tool requests and loops until the model answers without
//! asking for tools.
//!
//! # State machine
//!
//! ```text
//!   Idle ──► AwaitingResponse ──► Idle
//!               │      ▲
//!               ▼      │
//!              ToolLoop
//! ```
//!
//! Streaming is a mode of `AwaitingResponse`, not a separate state.
//!
//! # History is committed atomically
//!
//! The turns produced by one operation (the user turn, every assistant
//! turn, every tool-result turn) are appended together once the operation
//! succeeds. A failed call, or a stream dropped before it is drained,
//! leaves the conversation exactly as it was.
//!
//! # Example
//!
//! ```rust,no_run
//! use parley::Chat;
//!
//! # async fn example(provider: impl parley::Provider + 'static) -> Result<(), parley::LlmError> {
//! let mut chat = Chat::builder(provider)
//!     .system_prompt("Answer in one word.")
//!     .build();
//! let answer = chat.chat("What is 1 + 1?", false).await?;
//! println!("{answer} ({} tokens out)", chat.last_turn().map_or(0, |t| t.tokens_out()));
//! # Ok(())
//! # }
//! ```

use std::io::Write as _;
use std::time::Duration;

use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::aggregate::{self, Aggregator};
use crate::chat::{ContentBlock, Conversation, Role, Turn};
use crate::error::LlmError;
use crate::provider::{DynProvider, Provider, ProviderMetadata, RequestContext};
use crate::schema::{self, TypeSpec};
use crate::stream::{DeltaStream, TextStream};
use crate::tool::{ToolHandler, ToolLoopConfig, ToolRegistry};
use crate::usage::Usage;

/// Where the engine is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No request in flight.
    Idle,
    /// Waiting for the provider.
    AwaitingResponse {
        /// Whether the response is being streamed.
        streaming: bool,
    },
    /// Running tool requests from the last assistant turn.
    ToolLoop,
}

/// Request settings applied to every provider call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatConfig {
    /// System prompt sent with every request.
    pub system_prompt: Option<String>,
    /// Upper bound on generated tokens per call.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Per-request timeout, passed through to the adapter.
    pub timeout: Option<Duration>,
    /// Tool loop bounds.
    pub tool_loop: ToolLoopConfig,
}

/// Content of one user turn.
///
/// Converts from strings, single blocks, and block lists, so callers can
/// attach images or documents:
///
/// ```rust
/// use parley::chat::{ContentBlock, Media};
/// use parley::engine::UserInput;
///
/// let input = UserInput::from(vec![
///     ContentBlock::text("What is in this picture?"),
///     ContentBlock::Image(Media::from_bytes([0u8; 8], "image/png")),
/// ]);
/// assert_eq!(input.blocks().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct UserInput(Vec<ContentBlock>);

impl UserInput {
    /// The blocks making up the turn.
    pub fn blocks(&self) -> &[ContentBlock] {
        &self.0
    }

    fn into_turn(self) -> Result<Turn, LlmError> {
        if self.0.is_empty() {
            return Err(LlmError::InvalidRequest("user input is empty".into()));
        }
        Ok(Turn::new(Role::User, self.0))
    }
}

impl From<&str> for UserInput {
    fn from(text: &str) -> Self {
        Self(vec![ContentBlock::text(text)])
    }
}

impl From<String> for UserInput {
    fn from(text: String) -> Self {
        Self(vec![ContentBlock::text(text)])
    }
}

impl From<ContentBlock> for UserInput {
    fn from(block: ContentBlock) -> Self {
        Self(vec![block])
    }
}

impl From<Vec<ContentBlock>> for UserInput {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Self(blocks)
    }
}

/// Builder for [`Chat`].
pub struct ChatBuilder {
    provider: Box<dyn DynProvider>,
    tools: ToolRegistry,
    config: ChatConfig,
    turns: Vec<Turn>,
    /// First tool registration failure, reported by `try_build`.
    tool_error: Option<LlmError>,
}

impl std::fmt::Debug for ChatBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatBuilder")
            .field("provider", &self.provider.metadata().name)
            .field("tools", &self.tools)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChatBuilder {
    /// Sets the system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the generated-token bound.
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.config.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Sets the tool loop bounds.
    #[must_use]
    pub fn tool_loop(mut self, tool_loop: ToolLoopConfig) -> Self {
        self.config.tool_loop = tool_loop;
        self
    }

    /// Replaces the whole request configuration.
    #[must_use]
    pub fn config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers one tool.
    ///
    /// An invalid definition makes [`try_build`](Self::try_build) fail;
    /// [`build`](Self::build) logs it and keeps the other tools.
    #[must_use]
    pub fn tool(mut self, handler: impl ToolHandler + 'static) -> Self {
        if let Err(e) = self.tools.register(handler) {
            self.tool_error.get_or_insert(e);
        }
        self
    }

    /// Uses an already-populated tool registry.
    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Seeds the conversation with earlier turns.
    #[must_use]
    pub fn turns(mut self, turns: Vec<Turn>) -> Self {
        self.turns = turns;
        self
    }

    /// Builds the engine.
    ///
    /// Fails if a tool could not be registered or the seeded turns break
    /// tool-call pairing.
    pub fn try_build(self) -> Result<Chat, LlmError> {
        if let Some(e) = self.tool_error {
            return Err(e);
        }
        Ok(Chat {
            provider: self.provider,
            tools: self.tools,
            config: self.config,
            conversation: Conversation::from_turns(self.turns)?,
            state: EngineState::Idle,
        })
    }

    /// Builds the engine with an empty conversation, ignoring seeded turns
    /// if they are inconsistent.
    pub fn build(self) -> Chat {
        if let Some(e) = &self.tool_error {
            tracing::warn!(error = %e, "tool registration failed");
        }
        let provider = self.provider;
        let conversation = Conversation::from_turns(self.turns).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "discarding inconsistent seed turns");
            Conversation::new()
        });
        Chat {
            provider,
            tools: self.tools,
            config: self.config,
            conversation,
            state: EngineState::Idle,
        }
    }
}

/// A conversation with one provider.
///
/// Owns its history exclusively; operations take `&mut self`, so one
/// engine is driven by one caller at a time.
pub struct Chat {
    provider: Box<dyn DynProvider>,
    tools: ToolRegistry,
    config: ChatConfig,
    conversation: Conversation,
    state: EngineState,
}

impl std::fmt::Debug for Chat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chat")
            .field("provider", &self.provider.metadata())
            .field("tools", &self.tools)
            .field("config", &self.config)
            .field("turns", &self.conversation.len())
            .field("state", &self.state)
            .finish()
    }
}

impl Chat {
    /// Creates an engine with default settings.
    pub fn new(provider: impl Provider + 'static) -> Self {
        Self::builder(provider).build()
    }

    /// Starts a builder.
    pub fn builder(provider: impl Provider + 'static) -> ChatBuilder {
        Self::builder_boxed(Box::new(provider))
    }

    /// Starts a builder around an already type-erased provider, such as one
    /// built by the [`ProviderRegistry`](crate::registry::ProviderRegistry).
    pub fn builder_boxed(provider: Box<dyn DynProvider>) -> ChatBuilder {
        ChatBuilder {
            provider,
            tools: ToolRegistry::new(),
            config: ChatConfig::default(),
            turns: Vec::new(),
            tool_error: None,
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    /// The provider's metadata.
    pub fn provider(&self) -> ProviderMetadata {
        self.provider.metadata()
    }

    /// Current position in the request cycle.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The conversation so far.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// All turns, oldest first.
    pub fn turns(&self) -> &[Turn] {
        self.conversation.turns()
    }

    /// The most recent turn.
    pub fn last_turn(&self) -> Option<&Turn> {
        self.conversation.last()
    }

    /// The most recent turn with the given role.
    pub fn last_turn_by(&self, role: Role) -> Option<&Turn> {
        self.conversation.last_by(role)
    }

    /// Token usage summed over the whole conversation.
    pub fn total_usage(&self) -> Usage {
        self.conversation.total_usage()
    }

    /// Replaces the conversation, e.g. to restore a saved session.
    pub fn set_turns(&mut self, turns: Vec<Turn>) -> Result<(), LlmError> {
        self.conversation = Conversation::from_turns(turns)?;
        Ok(())
    }

    /// The request configuration.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Changes the system prompt used by later calls.
    pub fn set_system_prompt(&mut self, prompt: Option<String>) {
        self.config.system_prompt = prompt;
    }

    /// The registered tools.
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Registers a tool for later calls.
    pub fn register_tool(&mut self, handler: impl ToolHandler + 'static) -> Result<(), LlmError> {
        self.tools.register(handler)?;
        Ok(())
    }

    // ── Operations ─────────────────────────────────────────────────

    /// Sends `input`, runs the tool loop, and returns the text of the final
    /// assistant turn.
    ///
    /// With `echo`, the response is streamed and its text written to
    /// standard output as it arrives.
    pub async fn chat(&mut self, input: impl Into<UserInput>, echo: bool) -> Result<String, LlmError> {
        let staged = vec![input.into().into_turn()?];
        let result = self.run_exchange(staged, echo).await;
        self.set_state(EngineState::Idle);
        let staged = result?;
        let text = staged.last().map(Turn::text).unwrap_or_default();
        self.conversation.extend(staged)?;
        Ok(text)
    }

    async fn run_exchange(&mut self, mut staged: Vec<Turn>, echo: bool) -> Result<Vec<Turn>, LlmError> {
        let mut tool_turns = 0u32;
        loop {
            self.set_state(EngineState::AwaitingResponse { streaming: echo });
            let ctx = self.context(&staged, None);
            let turn = if echo {
                let stream = self.provider.stream_boxed(&ctx).await?;
                aggregate::collect_with(stream, |fragment| {
                    print!("{fragment}");
                    let _ = std::io::stdout().flush();
                })
                .await?
            } else {
                self.provider.send_boxed(&ctx).await?
            };

            if !turn.has_tool_requests() {
                staged.push(turn);
                return Ok(staged);
            }
            let results = self.run_tools(&turn, tool_turns).await?;
            tool_turns += 1;
            staged.push(turn);
            staged.push(results);
        }
    }

    /// Dispatches a turn's tool requests, or fails if the loop bound is hit.
    async fn run_tools(&mut self, turn: &Turn, tool_turns: u32) -> Result<Turn, LlmError> {
        let limit = self.config.tool_loop.max_tool_turns;
        if tool_turns >= limit {
            tracing::warn!(limit, "tool loop limit reached");
            return Err(LlmError::ToolLimitExceeded { limit });
        }
        self.set_state(EngineState::ToolLoop);
        let requests: Vec<_> = turn.tool_requests().cloned().collect();
        let parallel = self.config.tool_loop.parallel_tool_execution
            && self.provider.metadata().capabilities.parallel_tools;
        tracing::debug!(count = requests.len(), parallel, iteration = tool_turns + 1, "dispatching tool requests");
        let results = self.tools.dispatch(&requests, parallel).await;
        Ok(Turn::new(
            Role::User,
            results.into_iter().map(ContentBlock::ToolResult).collect(),
        ))
    }

    /// Like [`chat`](Self::chat), but yields text fragments as they arrive.
    ///
    /// The turns are appended only once the returned stream has been fully
    /// drained. Dropping it early leaves the conversation unchanged.
    pub fn stream(&mut self, input: impl Into<UserInput>) -> TextStream<'_> {
        let state = match input.into().into_turn() {
            Ok(turn) => StreamState {
                chat: self,
                staged: vec![turn],
                current: None,
                tool_turns: 0,
                done: false,
            },
            Err(e) => return Box::pin(futures::stream::once(async move { Err::<String, LlmError>(e) })),
        };
        Box::pin(futures::stream::unfold(state, |mut st| async move {
            let item = st.next_fragment().await?;
            Some((item, st))
        }))
    }

    /// Asks for a value shaped like `spec` and returns it.
    ///
    /// The value is checked client-side with [`schema::parse`] even when
    /// the provider enforces the schema itself; a mismatch fails with
    /// [`LlmError::SchemaMismatch`] and nothing is appended.
    pub async fn extract_data(
        &mut self,
        input: impl Into<UserInput>,
        spec: &TypeSpec,
    ) -> Result<Value, LlmError> {
        spec.check()?;
        let mut staged = vec![input.into().into_turn()?];
        self.set_state(EngineState::AwaitingResponse { streaming: false });
        let ctx = self.context(&staged, Some(spec));
        let result = self.provider.send_boxed(&ctx).await;
        self.set_state(EngineState::Idle);
        let turn = result?;

        let raw = match turn.structured_output() {
            Some(value) => value.clone(),
            None => {
                let requires_root_object = self.provider.metadata().capabilities.requires_root_object;
                unwrap_text_value(parse_json_text(&turn.text())?, spec, requires_root_object)?
            }
        };
        let value = schema::parse(raw, spec)?;
        staged.push(turn);
        self.conversation.extend(staged)?;
        Ok(value)
    }

    /// [`extract_data`](Self::extract_data) followed by deserialization into `T`.
    pub async fn extract<T: DeserializeOwned>(
        &mut self,
        input: impl Into<UserInput>,
        spec: &TypeSpec,
    ) -> Result<T, LlmError> {
        let value = self.extract_data(input, spec).await?;
        serde_json::from_value(value).map_err(|e| LlmError::mismatch("", e.to_string()))
    }

    // ── Internals ──────────────────────────────────────────────────

    fn context(&self, staged: &[Turn], output: Option<&TypeSpec>) -> RequestContext {
        RequestContext {
            turns: self
                .conversation
                .turns()
                .iter()
                .chain(staged)
                .cloned()
                .collect(),
            system: self.config.system_prompt.clone(),
            tools: if output.is_some() {
                Vec::new()
            } else {
                self.tools.definitions()
            },
            output: output.cloned(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            timeout: self.config.timeout,
        }
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "engine state");
            self.state = state;
        }
    }
}

/// Reads a JSON value from a text answer, tolerating a Markdown code fence.
fn parse_json_text(text: &str) -> Result<Value, LlmError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim())
        .map_err(|e| LlmError::mismatch("", format!("response is not JSON: {e}")))
}

/// Removes the `{"data": ...}` root wrapper from a JSON text answer when
/// the provider needed one for `spec`. A bare value is passed through.
fn unwrap_text_value(
    value: Value,
    spec: &TypeSpec,
    requires_root_object: bool,
) -> Result<Value, LlmError> {
    let compiled = schema::CompiledSchema::new(spec, requires_root_object)?;
    let has_wrapper = value
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.contains_key(schema::WRAPPER_FIELD));
    if compiled.is_wrapped() && has_wrapper {
        compiled.unwrap_value(value)
    } else {
        Ok(value)
    }
}

/// Drives [`Chat::stream`].
struct StreamState<'a> {
    chat: &'a mut Chat,
    staged: Vec<Turn>,
    current: Option<(DeltaStream, Aggregator)>,
    tool_turns: u32,
    done: bool,
}

impl StreamState<'_> {
    async fn next_fragment(&mut self) -> Option<Result<String, LlmError>> {
        loop {
            if self.done {
                return None;
            }
            match self.step().await {
                Ok(Some(fragment)) => return Some(Ok(fragment)),
                Ok(None) => {}
                Err(e) => {
                    self.done = true;
                    self.chat.set_state(EngineState::Idle);
                    return Some(Err(e));
                }
            }
        }
    }

    /// Advances by one delta. `Ok(None)` means no fragment was produced.
    async fn step(&mut self) -> Result<Option<String>, LlmError> {
        let Some((stream, aggregator)) = self.current.as_mut() else {
            self.chat
                .set_state(EngineState::AwaitingResponse { streaming: true });
            let ctx = self.chat.context(&self.staged, None);
            let stream = self.chat.provider.stream_boxed(&ctx).await?;
            self.current = Some((stream, Aggregator::new()));
            return Ok(None);
        };

        match stream.next().await {
            Some(event) => {
                if let Some(fragment) = aggregator.push(event?)? {
                    return Ok(Some(fragment));
                }
                if aggregator.is_complete() {
                    self.finish_turn().await?;
                }
            }
            // Ended without TurnComplete; `finish` reports it.
            None => self.finish_turn().await?,
        }
        Ok(None)
    }

    async fn finish_turn(&mut self) -> Result<(), LlmError> {
        let Some((_, aggregator)) = self.current.take() else {
            return Ok(());
        };
        let turn = aggregator.finish()?;
        if !turn.has_tool_requests() {
            self.staged.push(turn);
            let staged = std::mem::take(&mut self.staged);
            self.chat.conversation.extend(staged)?;
            self.chat.set_state(EngineState::Idle);
            self.done = true;
            return Ok(());
        }
        let results = self.chat.run_tools(&turn, self.tool_turns).await?;
        self.tool_turns += 1;
        self.staged.push(turn);
        self.staged.push(results);
        Ok(())
    }
}

impl Drop for StreamState<'_> {
    fn drop(&mut self) {
        if !self.done {
            tracing::debug!("stream dropped before completion; conversation unchanged");
        }
        self.chat.state = EngineState::Idle;
    }
}
