//! Pre-built helpers for testing code that uses `parley` types.
//!
//! Available when the `test-utils` feature is enabled, so adapter crates
//! and applications can reuse them in their own suites. Also compiled for
//! this crate's own tests. Provides sample turns, delta scripts, stream
//! collectors, and a quick [`MockProvider`] factory.

use futures::StreamExt;
use serde_json::Value;

use crate::chat::{ContentBlock, Role, ToolRequest, Turn};
use crate::error::LlmError;
use crate::mock::MockProvider;
use crate::schema::TypeSpec;
use crate::stream::{DeltaEvent, DeltaStream};
use crate::usage::Usage;

/// Builds an assistant [`Turn`] with a single text block and sample usage.
pub fn sample_turn(text: &str) -> Turn {
    Turn::assistant(text).with_usage(sample_usage())
}

/// Builds an assistant [`Turn`] requesting the given tool calls.
pub fn sample_tool_turn(requests: Vec<ToolRequest>) -> Turn {
    Turn::new(
        Role::Assistant,
        requests.into_iter().map(ContentBlock::ToolRequest).collect(),
    )
    .with_usage(sample_usage())
}

/// Builds an assistant [`Turn`] carrying a structured value.
pub fn sample_structured_turn(value: Value, spec: &TypeSpec) -> Turn {
    Turn::new(
        Role::Assistant,
        vec![ContentBlock::StructuredOutput {
            value,
            spec: spec.clone(),
        }],
    )
    .with_usage(sample_usage())
}

/// Shorthand for [`ToolRequest::new`].
pub fn tool_request(id: &str, name: &str, arguments: Value) -> ToolRequest {
    ToolRequest::new(id, name, arguments)
}

/// Returns a [`Usage`] with 100 input / 50 output tokens.
pub fn sample_usage() -> Usage {
    Usage::new(100, 50)
}

/// Deltas for a plain text answer: one `TextDelta` per fragment, sample
/// usage, then `TurnComplete`.
pub fn text_stream_events(fragments: &[&str]) -> Vec<DeltaEvent> {
    let usage = sample_usage();
    fragments
        .iter()
        .map(|f| DeltaEvent::text(*f))
        .chain([
            DeltaEvent::UsageDelta {
                tokens_in: usage.input_tokens,
                tokens_out: usage.output_tokens,
            },
            DeltaEvent::TurnComplete,
        ])
        .collect()
}

/// Deltas for one tool call whose arguments arrive split into `chunks`.
pub fn tool_call_stream_events(id: &str, name: &str, chunks: &[&str]) -> Vec<DeltaEvent> {
    std::iter::once(DeltaEvent::ToolCallStart {
        id: id.into(),
        name: name.into(),
    })
    .chain(chunks.iter().map(|c| DeltaEvent::ToolCallDelta {
        id: id.into(),
        partial_arguments: (*c).into(),
    }))
    .chain([
        DeltaEvent::ToolCallComplete { id: id.into() },
        DeltaEvent::TurnComplete,
    ])
    .collect()
}

/// Collect stream events, returning results including errors.
pub async fn collect_stream_results(stream: DeltaStream) -> Vec<Result<DeltaEvent, LlmError>> {
    stream.collect::<Vec<_>>().await
}

/// Collect stream events, panicking on any error.
/// Use `collect_stream_results` when testing error scenarios.
pub async fn collect_stream(stream: DeltaStream) -> Vec<DeltaEvent> {
    stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(|r| r.expect("stream event should be Ok"))
        .collect()
}

/// Creates a [`MockProvider`] with the given name, model and default
/// capabilities.
pub fn mock_for(provider_name: &str, model: &str) -> MockProvider {
    MockProvider::named(provider_name, model)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_sample_turn_is_valid() {
        let t = sample_turn("hello");
        assert_eq!(t.role, Role::Assistant);
        assert_eq!(t.text(), "hello");
        assert!(t.tokens_out() > 0);
    }

    #[test]
    fn test_sample_tool_turn() {
        let t = sample_tool_turn(vec![tool_request("tc_1", "search", json!({"q": "rust"}))]);
        assert!(t.has_tool_requests());
        assert_eq!(t.tool_requests().next().unwrap().name, "search");
    }

    #[test]
    fn test_sample_structured_turn() {
        let spec = TypeSpec::object().field("a", TypeSpec::integer()).build();
        let t = sample_structured_turn(json!({"a": 1}), &spec);
        assert_eq!(t.structured_output(), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_text_stream_events_shape() {
        let events = text_stream_events(&["a", "b"]);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], DeltaEvent::text("a"));
        assert_eq!(events[3], DeltaEvent::TurnComplete);
    }

    #[test]
    fn test_tool_call_stream_events_shape() {
        let events = tool_call_stream_events("c1", "add", &["{\"a\":", "1}"]);
        assert_eq!(events.len(), 5);
        assert!(matches!(&events[0], DeltaEvent::ToolCallStart { name, .. } if name == "add"));
    }

    #[tokio::test]
    async fn test_collect_stream_happy() {
        let stream: DeltaStream =
            Box::pin(futures::stream::iter(text_stream_events(&["hello"]).into_iter().map(Ok)));
        let collected = collect_stream(stream).await;
        assert_eq!(collected.len(), 3);
    }

    #[tokio::test]
    async fn test_collect_stream_results_with_errors() {
        let events = vec![
            Ok(DeltaEvent::text("hello")),
            Err(LlmError::Provider {
                status: Some(http::StatusCode::INTERNAL_SERVER_ERROR),
                body: "server error".into(),
                retryable: true,
            }),
        ];
        let stream: DeltaStream = Box::pin(futures::stream::iter(events));
        let collected = collect_stream_results(stream).await;
        assert_eq!(collected.len(), 2);
        assert!(collected[0].is_ok());
        assert!(collected[1].is_err());
    }

    #[test]
    fn test_mock_for_helper() {
        let mock = mock_for("anthropic", "claude-sonnet-4");
        let meta = crate::provider::Provider::metadata(&mock);
        assert_eq!(meta.name, "anthropic");
        assert_eq!(meta.model, "claude-sonnet-4");
    }
}
