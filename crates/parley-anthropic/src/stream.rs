//! SSE stream parser for the Messages API.
//!
//! Turns the raw byte stream of a `stream: true` response into a
//! [`DeltaStream`]. Handles UTF-8 sequences split across chunks and maps
//! content-block indices to tool-call ids.

use std::collections::HashMap;

use futures::stream::StreamExt;
use parley::error::LlmError;
use parley::stream::{DeltaEvent, DeltaStream};
use serde_json::Value;

use crate::types::{ErrorDetail, StreamResponse};

/// Maximum size for the decode buffer before the stream is aborted.
const MAX_BUF: usize = 16 * 1024 * 1024; // 16 MiB

/// Per-response parser state.
#[derive(Debug, Default)]
struct SseState {
    buffer: String,
    utf8_buf: Vec<u8>,
    /// Content-block index to tool-call id.
    tool_ids: HashMap<u32, String>,
}

impl SseState {
    /// Consumes one network chunk, returning the events it completes.
    fn feed(&mut self, bytes: &[u8]) -> Vec<Result<DeltaEvent, LlmError>> {
        self.utf8_buf.extend_from_slice(bytes);
        if self.utf8_buf.len() + self.buffer.len() > MAX_BUF {
            self.utf8_buf.clear();
            self.buffer.clear();
            return vec![Err(LlmError::ResponseFormat {
                message: "SSE stream buffer exceeded 16 MiB".into(),
                raw: String::new(),
            })];
        }

        // Invalid bytes are dropped; an incomplete trailing sequence waits
        // for the next chunk.
        let mut dropped = 0usize;
        loop {
            let (valid_up_to, skip) = match std::str::from_utf8(&self.utf8_buf) {
                Ok(_) => (self.utf8_buf.len(), 0),
                Err(e) => (e.valid_up_to(), e.error_len().unwrap_or(0)),
            };
            if let Ok(text) = std::str::from_utf8(&self.utf8_buf[..valid_up_to]) {
                self.buffer.push_str(text);
            }
            self.utf8_buf.drain(..valid_up_to + skip);
            dropped += skip;
            if skip == 0 {
                break;
            }
        }
        if dropped > 0 {
            tracing::warn!(bytes = dropped, "dropped invalid UTF-8 from stream");
        }

        let mut results = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let event_text: String = self.buffer.drain(..pos + 2).collect();
            results.extend(parse_sse_event(&event_text, &mut self.tool_ids));
        }
        results
    }
}

/// Converts a streaming HTTP response into a [`DeltaStream`].
pub(crate) fn into_stream(response: reqwest::Response) -> DeltaStream {
    let stream = response
        .bytes_stream()
        .scan(SseState::default(), |state, chunk| {
            let results = match chunk {
                Ok(bytes) => state.feed(&bytes),
                Err(e) => vec![Err(LlmError::Provider {
                    status: None,
                    body: format!("stream read error: {e}"),
                    retryable: true,
                })],
            };
            async move { Some(results) }
        })
        .flat_map(futures::stream::iter);

    Box::pin(stream)
}

/// Parses one SSE event into zero or more deltas.
///
/// Pings and events with no `parley` counterpart yield nothing. A `data:`
/// payload that is not JSON yields [`LlmError::ResponseFormat`].
fn parse_sse_event(
    event_text: &str,
    tool_ids: &mut HashMap<u32, String>,
) -> Vec<Result<DeltaEvent, LlmError>> {
    let Some(data) = extract_data_line(event_text) else {
        return vec![];
    };
    let value = match serde_json::from_str::<Value>(data) {
        Ok(value) => value,
        Err(e) => {
            return vec![Err(LlmError::ResponseFormat {
                message: format!("invalid stream event: {e}"),
                raw: data.to_owned(),
            })];
        }
    };
    let response = match serde_json::from_value::<StreamResponse>(value) {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(error = %e, "skipping unrecognized stream event");
            return vec![];
        }
    };

    match response.event_type.as_str() {
        "message_start" => response
            .message
            .and_then(|m| m.usage)
            .map(|u| {
                Ok(DeltaEvent::UsageDelta {
                    tokens_in: u.input_tokens,
                    tokens_out: 0,
                })
            })
            .into_iter()
            .collect(),
        "content_block_start" => handle_block_start(response, tool_ids),
        "content_block_delta" => handle_block_delta(response, tool_ids),
        "content_block_stop" => response
            .index
            .and_then(|index| tool_ids.remove(&index))
            .map(|id| Ok(DeltaEvent::ToolCallComplete { id }))
            .into_iter()
            .collect(),
        "message_delta" => response
            .usage
            .map(|u| {
                Ok(DeltaEvent::UsageDelta {
                    tokens_in: 0,
                    tokens_out: u.output_tokens,
                })
            })
            .into_iter()
            .collect(),
        "message_stop" => vec![Ok(DeltaEvent::TurnComplete)],
        "error" => vec![Err(stream_error(response.error))],
        _ => vec![],
    }
}

fn handle_block_start(
    response: StreamResponse,
    tool_ids: &mut HashMap<u32, String>,
) -> Vec<Result<DeltaEvent, LlmError>> {
    let (Some(index), Some(block)) = (response.index, response.content_block) else {
        return vec![];
    };
    if block.block_type != "tool_use" {
        return vec![];
    }

    let id = block.id.unwrap_or_default();
    tool_ids.insert(index, id.clone());
    vec![Ok(DeltaEvent::ToolCallStart {
        id,
        name: block.name.unwrap_or_default(),
    })]
}

fn handle_block_delta(
    response: StreamResponse,
    tool_ids: &HashMap<u32, String>,
) -> Vec<Result<DeltaEvent, LlmError>> {
    let (Some(index), Some(delta)) = (response.index, response.delta) else {
        return vec![];
    };

    match delta.delta_type.as_deref() {
        Some("text_delta") => delta
            .text
            .map(|text| Ok(DeltaEvent::TextDelta { text }))
            .into_iter()
            .collect(),
        Some("input_json_delta") => match (tool_ids.get(&index), delta.partial_json) {
            (Some(id), Some(partial_arguments)) if !partial_arguments.is_empty() => {
                vec![Ok(DeltaEvent::ToolCallDelta {
                    id: id.clone(),
                    partial_arguments,
                })]
            }
            _ => vec![],
        },
        _ => vec![],
    }
}

fn stream_error(detail: Option<ErrorDetail>) -> LlmError {
    let (error_type, message) = detail.map_or_else(
        || (String::new(), "unknown stream error".to_string()),
        |d| (d.error_type, d.message),
    );
    LlmError::Provider {
        status: None,
        retryable: error_type == "overloaded_error",
        body: message,
    }
}

/// Extracts the `data: ` payload from an SSE event text block.
fn extract_data_line(event_text: &str) -> Option<&str> {
    event_text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .find_map(|line| line.strip_prefix("data: "))
}

#[cfg(test)]
mod tests {
    use parley::aggregate::Aggregator;

    use super::*;

    fn parse(event: &str, tool_ids: &mut HashMap<u32, String>) -> Vec<DeltaEvent> {
        parse_sse_event(event, tool_ids)
            .into_iter()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn test_extract_data_line() {
        let event = "event: content_block_delta\ndata: {\"type\":\"content_block_delta\"}\n\n";
        assert_eq!(
            extract_data_line(event),
            Some("{\"type\":\"content_block_delta\"}")
        );
        assert_eq!(extract_data_line("event: ping\n\n"), None);
        assert_eq!(extract_data_line("data: {}\r\n\r\n"), Some("{}"));
    }

    #[test]
    fn test_parse_text_delta() {
        let event = r#"event: content_block_delta
data: {"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hello"}}

"#;
        let events = parse(event, &mut HashMap::new());
        assert_eq!(events, vec![DeltaEvent::text("Hello")]);
    }

    #[test]
    fn test_parse_tool_use_lifecycle() {
        let mut tool_ids = HashMap::new();

        let start = r#"data: {"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_01", "name": "get_weather"}}

"#;
        assert_eq!(
            parse(start, &mut tool_ids),
            vec![DeltaEvent::ToolCallStart {
                id: "toolu_01".into(),
                name: "get_weather".into()
            }]
        );

        let delta = r#"data: {"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"city\":"}}

"#;
        assert_eq!(
            parse(delta, &mut tool_ids),
            vec![DeltaEvent::ToolCallDelta {
                id: "toolu_01".into(),
                partial_arguments: "{\"city\":".into()
            }]
        );

        let stop = "data: {\"type\": \"content_block_stop\", \"index\": 1}\n\n";
        assert_eq!(
            parse(stop, &mut tool_ids),
            vec![DeltaEvent::ToolCallComplete {
                id: "toolu_01".into()
            }]
        );
        assert!(tool_ids.is_empty());
    }

    #[test]
    fn test_text_block_stop_is_noop() {
        let stop = "data: {\"type\": \"content_block_stop\", \"index\": 0}\n\n";
        assert!(parse(stop, &mut HashMap::new()).is_empty());
    }

    #[test]
    fn test_usage_split_across_events() {
        let start = r#"data: {"type": "message_start", "message": {"usage": {"input_tokens": 42, "output_tokens": 1}}}

"#;
        let delta = r#"data: {"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 15}}

"#;
        let mut tool_ids = HashMap::new();
        assert_eq!(
            parse(start, &mut tool_ids),
            vec![DeltaEvent::UsageDelta {
                tokens_in: 42,
                tokens_out: 0
            }]
        );
        assert_eq!(
            parse(delta, &mut tool_ids),
            vec![DeltaEvent::UsageDelta {
                tokens_in: 0,
                tokens_out: 15
            }]
        );
    }

    #[test]
    fn test_message_stop_completes_turn() {
        let event = "event: message_stop\ndata: {\"type\": \"message_stop\"}\n\n";
        assert_eq!(
            parse(event, &mut HashMap::new()),
            vec![DeltaEvent::TurnComplete]
        );
    }

    #[test]
    fn test_ping_ignored() {
        assert!(parse("event: ping\ndata: {\"type\": \"ping\"}\n\n", &mut HashMap::new()).is_empty());
    }

    #[test]
    fn test_error_event() {
        let event = r#"event: error
data: {"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}

"#;
        let results = parse_sse_event(event, &mut HashMap::new());
        assert!(matches!(
            &results[0],
            Err(LlmError::Provider { status: None, body, retryable: true }) if body == "Overloaded"
        ));
    }

    #[test]
    fn test_invalid_json_payload_is_response_format_error() {
        let event = "event: content_block_delta\ndata: {\"type\": \"content_block_de\n\n";
        let results = parse_sse_event(event, &mut HashMap::new());

        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(LlmError::ResponseFormat { raw, .. }) => {
                assert_eq!(raw, "{\"type\": \"content_block_de");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_unrecognized_event_shape_skipped() {
        assert!(parse("data: {\"index\": 0}\n\n", &mut HashMap::new()).is_empty());
    }

    #[test]
    fn test_feed_drops_invalid_utf8() {
        let mut state = SseState::default();
        let mut bytes =
            b"data: {\"type\": \"content_block_delta\", \"index\": 0, \"delta\": {\"type\": \"text_delta\", \"text\": \"a"
                .to_vec();
        bytes.push(0xC0);
        bytes.extend_from_slice(b"b\"}}\n\n");

        let events = state.feed(&bytes);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap(), &DeltaEvent::text("ab"));
    }

    #[test]
    fn test_feed_handles_split_chunks() {
        let mut state = SseState::default();
        let payload = "data: {\"type\": \"content_block_delta\", \"index\": 0, \"delta\": {\"type\": \"text_delta\", \"text\": \"héllo\"}}\n\n";
        let bytes = payload.as_bytes();
        // Split inside the two-byte 'é'.
        let split = payload.find('é').unwrap() + 1;

        assert!(state.feed(&bytes[..split]).is_empty());
        let events = state.feed(&bytes[split..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap(), &DeltaEvent::text("héllo"));
    }

    #[test]
    fn test_full_stream_aggregates() {
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":10,\"output_tokens\":1}}}\n\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Adding\"}}\n\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"t1\",\"name\":\"add\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"a\\\": 1,\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\" \\\"b\\\": 2}\"}}\n\n",
            "data: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":20}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );

        let mut state = SseState::default();
        let mut agg = Aggregator::new();
        for event in state.feed(body.as_bytes()) {
            agg.push(event.unwrap()).unwrap();
        }
        assert!(agg.is_complete());

        let turn = agg.finish().unwrap();
        assert_eq!(turn.text(), "Adding");
        let call = turn.tool_requests().next().unwrap();
        assert_eq!(call.name, "add");
        assert_eq!(call.arguments["b"], 2);
        assert_eq!(turn.tokens_in(), 10);
        assert_eq!(turn.tokens_out(), 20);
    }
}
