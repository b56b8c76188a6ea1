//! Mock provider for testing.
//!
//! [`MockProvider`] is a queue-based fake that lets tests control exactly
//! which turns, deltas and errors a provider returns, without touching the
//! network. It implements [`Provider`], so it works anywhere a real adapter
//! does, including behind [`DynProvider`](crate::DynProvider) inside a
//! [`Chat`](crate::Chat).
//!
//! Like a real adapter it runs [`Capabilities::check`] before anything
//! else: a rejected request is neither recorded nor dequeued.
//!
//! # Usage
//!
//! ```rust
//! use parley::mock::MockProvider;
//! use parley::{Chat, Turn};
//!
//! # async fn example() {
//! let mock = MockProvider::named("test", "test-model");
//! mock.queue_turn(Turn::assistant("Hello!"));
//!
//! let mut chat = Chat::new(mock.clone());
//! let answer = chat.chat("Hi", false).await.unwrap();
//! assert_eq!(answer, "Hello!");
//! assert_eq!(mock.recorded_calls().len(), 1);
//! # }
//! ```
//!
//! # Why `MockError` instead of `LlmError`?
//!
//! [`LlmError`] is not `Clone`, so it can't sit in a shared queue.
//! [`MockError`] mirrors the provider-side variants in a cloneable form
//! and converts to `LlmError` at dequeue time.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::chat::Turn;
use crate::error::LlmError;
use crate::provider::{Capabilities, Provider, ProviderMetadata, RequestContext};
use crate::stream::{DeltaEvent, DeltaStream};

type StreamScript = Vec<Result<DeltaEvent, MockError>>;

#[derive(Default)]
struct Queues {
    turns: VecDeque<Result<Turn, MockError>>,
    streams: VecDeque<Result<StreamScript, MockError>>,
    calls: Vec<RequestContext>,
}

/// A queue-based mock provider for unit and integration tests.
///
/// Push turns with [`queue_turn`](Self::queue_turn) and deltas with
/// [`queue_stream`](Self::queue_stream). Each `send` or `stream` call pops
/// from the front of its queue and records the [`RequestContext`] for
/// later assertion via [`recorded_calls`](Self::recorded_calls).
///
/// Clones share their queues, so a test can keep a handle after moving
/// one into a [`Chat`](crate::Chat).
///
/// # Panics
///
/// [`send`](Provider::send) panics if the turn queue is empty, and
/// [`stream`](Provider::stream) if the stream queue is empty.
#[derive(Clone)]
pub struct MockProvider {
    queues: Arc<Mutex<Queues>>,
    meta: ProviderMetadata,
}

/// Cloneable error subset for mock queuing.
#[derive(Debug, Clone)]
pub enum MockError {
    /// Maps to [`LlmError::Provider`].
    Provider {
        /// HTTP status code, if any.
        status: Option<http::StatusCode>,
        /// Response body.
        body: String,
        /// Whether the error is retryable.
        retryable: bool,
    },
    /// Maps to [`LlmError::Timeout`].
    Timeout {
        /// Elapsed milliseconds.
        elapsed_ms: u64,
    },
    /// Maps to [`LlmError::ResponseFormat`].
    ResponseFormat {
        /// What went wrong during decoding.
        message: String,
        /// The raw payload.
        raw: String,
    },
    /// Maps to [`LlmError::InvalidRequest`].
    InvalidRequest(String),
}

impl MockError {
    fn into_llm_error(self) -> LlmError {
        match self {
            Self::Provider {
                status,
                body,
                retryable,
            } => LlmError::Provider {
                status,
                body,
                retryable,
            },
            Self::Timeout { elapsed_ms } => LlmError::Timeout { elapsed_ms },
            Self::ResponseFormat { message, raw } => LlmError::ResponseFormat { message, raw },
            Self::InvalidRequest(msg) => LlmError::InvalidRequest(msg),
        }
    }
}

impl fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queues = self.queues.lock().unwrap();
        f.debug_struct("MockProvider")
            .field("meta", &self.meta)
            .field("queued_turns", &queues.turns.len())
            .field("queued_streams", &queues.streams.len())
            .field("recorded_calls", &queues.calls.len())
            .finish()
    }
}

impl MockProvider {
    /// Creates a new mock with the given metadata and empty queues.
    pub fn new(meta: ProviderMetadata) -> Self {
        Self {
            queues: Arc::new(Mutex::new(Queues::default())),
            meta,
        }
    }

    /// Creates a mock with default capabilities.
    pub fn named(name: &str, model: &str) -> Self {
        Self::new(ProviderMetadata {
            name: name.to_owned().into(),
            model: model.into(),
            capabilities: Capabilities::default(),
        })
    }

    /// Replaces the advertised capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.meta.capabilities = capabilities;
        self
    }

    /// Enqueues a turn for the next `send` call.
    pub fn queue_turn(&self, turn: Turn) -> &Self {
        self.queues.lock().unwrap().turns.push_back(Ok(turn));
        self
    }

    /// Enqueues an error for the next `send` call.
    pub fn queue_error(&self, error: MockError) -> &Self {
        self.queues.lock().unwrap().turns.push_back(Err(error));
        self
    }

    /// Enqueues deltas for the next `stream` call.
    pub fn queue_stream(&self, events: Vec<DeltaEvent>) -> &Self {
        self.queue_stream_results(events.into_iter().map(Ok).collect())
    }

    /// Enqueues deltas for the next `stream` call, some of which may be
    /// errors raised mid-stream.
    pub fn queue_stream_results(&self, events: Vec<Result<DeltaEvent, MockError>>) -> &Self {
        self.queues.lock().unwrap().streams.push_back(Ok(events));
        self
    }

    /// Enqueues an error returned by `stream()` itself, before any delta.
    pub fn queue_stream_error(&self, error: MockError) -> &Self {
        self.queues.lock().unwrap().streams.push_back(Err(error));
        self
    }

    /// Returns a clone of every context passed to `send` or `stream`, in
    /// call order.
    pub fn recorded_calls(&self) -> Vec<RequestContext> {
        self.queues.lock().unwrap().calls.clone()
    }

    /// Number of queued turns not yet consumed.
    pub fn remaining_turns(&self) -> usize {
        self.queues.lock().unwrap().turns.len()
    }

    fn admit(&self, ctx: &RequestContext) -> Result<(), LlmError> {
        self.meta.capabilities.check(&self.meta.name, ctx)?;
        self.queues.lock().unwrap().calls.push(ctx.clone());
        Ok(())
    }
}

impl Provider for MockProvider {
    async fn send(&self, ctx: &RequestContext) -> Result<Turn, LlmError> {
        self.admit(ctx)?;
        let next = self
            .queues
            .lock()
            .unwrap()
            .turns
            .pop_front()
            .expect("MockProvider: no queued turns remaining");
        next.map_err(MockError::into_llm_error)
    }

    async fn stream(&self, ctx: &RequestContext) -> Result<DeltaStream, LlmError> {
        self.admit(ctx)?;
        let next = self
            .queues
            .lock()
            .unwrap()
            .streams
            .pop_front()
            .expect("MockProvider: no queued streams remaining");
        let events = next.map_err(MockError::into_llm_error)?;
        let stream =
            futures::stream::iter(events.into_iter().map(|e| e.map_err(MockError::into_llm_error)));
        Ok(Box::pin(stream))
    }

    fn metadata(&self) -> ProviderMetadata {
        self.meta.clone()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::chat::{ContentBlock, Media, Role};
    use crate::provider::DynProvider;
    use crate::test_helpers::{mock_for, sample_turn, text_stream_events};

    fn user_ctx(text: &str) -> RequestContext {
        RequestContext {
            turns: vec![Turn::user(text)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_mock_send_returns_queued() {
        let mock = mock_for("mock", "test-model");
        let turn = sample_turn("test");
        mock.queue_turn(turn.clone());

        let result = mock.send(&user_ctx("hi")).await.unwrap();
        assert_eq!(result, turn);
    }

    #[tokio::test]
    async fn test_mock_send_in_order() {
        let mock = mock_for("mock", "test-model");
        mock.queue_turn(sample_turn("first"))
            .queue_turn(sample_turn("second"));

        let r1 = mock.send(&user_ctx("a")).await.unwrap();
        let r2 = mock.send(&user_ctx("b")).await.unwrap();
        assert_eq!(r1.text(), "first");
        assert_eq!(r2.text(), "second");
        assert_eq!(mock.remaining_turns(), 0);
    }

    #[tokio::test]
    async fn test_mock_send_error() {
        let mock = mock_for("mock", "test-model");
        mock.queue_error(MockError::Provider {
            status: Some(http::StatusCode::TOO_MANY_REQUESTS),
            body: "slow down".into(),
            retryable: true,
        });

        let err = mock.send(&user_ctx("hi")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, LlmError::Provider { .. }));
    }

    #[tokio::test]
    #[should_panic(expected = "no queued turns")]
    async fn test_mock_send_empty_queue_panics() {
        let mock = mock_for("mock", "test-model");
        let _ = mock.send(&user_ctx("hi")).await;
    }

    #[tokio::test]
    async fn test_mock_stream_returns_events() {
        let mock = mock_for("mock", "test-model");
        mock.queue_stream(text_stream_events(&["hello", " world"]));

        let stream = mock.stream(&user_ctx("hi")).await.unwrap();
        let events: Vec<_> = stream.collect().await;
        assert!(events.iter().all(Result::is_ok));
        assert_eq!(events.last().unwrap().as_ref().unwrap(), &DeltaEvent::TurnComplete);
    }

    #[tokio::test]
    async fn test_mock_stream_mid_stream_error() {
        let mock = mock_for("mock", "test-model");
        mock.queue_stream_results(vec![
            Ok(DeltaEvent::text("partial")),
            Err(MockError::Timeout { elapsed_ms: 100 }),
        ]);

        let stream = mock.stream(&user_ctx("hi")).await.unwrap();
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(LlmError::Timeout { elapsed_ms: 100 })));
    }

    #[tokio::test]
    async fn test_mock_stream_error_before_events() {
        let mock = mock_for("mock", "test-model");
        mock.queue_stream_error(MockError::InvalidRequest("bad".into()));
        let result = mock.stream(&user_ctx("hi")).await;
        assert!(matches!(result, Err(LlmError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_mock_records_calls_and_shares_clones() {
        let mock = mock_for("mock", "test-model");
        let handle = mock.clone();
        mock.queue_turn(sample_turn("a"));

        let boxed: Box<dyn DynProvider> = Box::new(mock);
        boxed.send_boxed(&user_ctx("question")).await.unwrap();

        let calls = handle.recorded_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].turns[0].text(), "question");
    }

    #[tokio::test]
    async fn test_mock_checks_capabilities_first() {
        let mock = mock_for("mock", "test-model");
        mock.queue_turn(sample_turn("unused"));
        let ctx = RequestContext {
            turns: vec![Turn::new(
                Role::User,
                vec![ContentBlock::Document(Media::from_bytes(b"%PDF", "application/pdf"))],
            )],
            ..Default::default()
        };

        let err = mock.send(&ctx).await.unwrap_err();
        assert!(matches!(err, LlmError::Capability { .. }));
        assert!(mock.recorded_calls().is_empty());
        assert_eq!(mock.remaining_turns(), 1);
    }

    #[test]
    fn test_mock_debug_counts() {
        let mock = mock_for("mock", "test-model");
        mock.queue_turn(sample_turn("x"));
        let debug = format!("{mock:?}");
        assert!(debug.contains("queued_turns: 1"));
    }
}
