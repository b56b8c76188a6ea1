//! SSE stream parser for the Chat Completions API.
//!
//! Tool-call fragments are keyed by `index` on the wire; only the first
//! fragment for an index carries the call id, so the parser remembers the
//! mapping and closes every open call when a `finish_reason` arrives.
//! With `include_usage`, usage comes in a final chunk with no choices,
//! after which the server sends `[DONE]`.

use std::collections::BTreeMap;

use futures::stream::StreamExt;
use parley::error::LlmError;
use parley::stream::{DeltaEvent, DeltaStream};
use serde_json::Value;

use crate::types::StreamChunk;

/// Maximum size for the decode buffer before the stream is aborted.
const MAX_BUF: usize = 16 * 1024 * 1024; // 16 MiB

#[derive(Debug, Default)]
struct SseState {
    buffer: String,
    utf8_buf: Vec<u8>,
    /// Open tool calls: wire index to call id.
    open_calls: BTreeMap<u32, String>,
}

impl SseState {
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
            match self.parse_sse_event(&event_text) {
                Ok(events) => results.extend(events.into_iter().map(Ok)),
                Err(e) => results.push(Err(e)),
            }
        }
        results
    }

    /// Parses one SSE event into zero or more deltas.
    ///
    /// A `data:` payload that is not JSON is a [`LlmError::ResponseFormat`];
    /// JSON of an unrecognized shape is logged and skipped.
    fn parse_sse_event(&mut self, event_text: &str) -> Result<Vec<DeltaEvent>, LlmError> {
        let Some(data) = extract_data_line(event_text) else {
            return Ok(vec![]);
        };
        if data == "[DONE]" {
            let mut events = self.close_open_calls();
            events.push(DeltaEvent::TurnComplete);
            return Ok(events);
        }
        let value: Value = serde_json::from_str(data).map_err(|e| LlmError::ResponseFormat {
            message: format!("invalid stream event: {e}"),
            raw: data.to_owned(),
        })?;
        let chunk = match serde_json::from_value::<StreamChunk>(value) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognized stream event");
                return Ok(vec![]);
            }
        };
        if let Some(error) = chunk.error {
            return Err(LlmError::Provider {
                status: None,
                body: error.message,
                retryable: false,
            });
        }

        let mut events = Vec::new();
        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                events.push(DeltaEvent::TextDelta { text });
            }

            for call in choice.delta.tool_calls {
                let (name, arguments) = call
                    .function
                    .map_or((None, None), |f| (f.name, f.arguments));
                if let Some(id) = call.id {
                    self.open_calls.insert(call.index, id.clone());
                    events.push(DeltaEvent::ToolCallStart {
                        id,
                        name: name.unwrap_or_default(),
                    });
                }
                match (self.open_calls.get(&call.index), arguments) {
                    (Some(id), Some(partial_arguments)) if !partial_arguments.is_empty() => {
                        events.push(DeltaEvent::ToolCallDelta {
                            id: id.clone(),
                            partial_arguments,
                        });
                    }
                    _ => {}
                }
            }

            if choice.finish_reason.is_some() {
                events.extend(self.close_open_calls());
            }
        }

        if let Some(usage) = chunk.usage {
            events.push(DeltaEvent::UsageDelta {
                tokens_in: usage.prompt_tokens,
                tokens_out: usage.completion_tokens,
            });
        }
        Ok(events)
    }

    /// Closes open calls in wire order.
    fn close_open_calls(&mut self) -> Vec<DeltaEvent> {
        std::mem::take(&mut self.open_calls)
            .into_values()
            .map(|id| DeltaEvent::ToolCallComplete { id })
            .collect()
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

    fn feed_all(state: &mut SseState, body: &str) -> Vec<DeltaEvent> {
        state
            .feed(body.as_bytes())
            .into_iter()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn test_text_deltas() {
        let mut state = SseState::default();
        let events = feed_all(
            &mut state,
            concat!(
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"},\"finish_reason\":null}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
            ),
        );
        assert_eq!(events, vec![DeltaEvent::text("Hel"), DeltaEvent::text("lo")]);
    }

    #[test]
    fn test_tool_calls_keyed_by_index() {
        let mut state = SseState::default();
        let events = feed_all(
            &mut state,
            concat!(
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"type\":\"function\",\"function\":{\"name\":\"add\",\"arguments\":\"\"}}]},\"finish_reason\":null}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"call_b\",\"type\":\"function\",\"function\":{\"name\":\"mul\",\"arguments\":\"{\\\"a\\\":2}\"}}]},\"finish_reason\":null}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"a\\\":1}\"}}]},\"finish_reason\":null}]}\n\n",
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            ),
        );

        assert_eq!(
            events,
            vec![
                DeltaEvent::ToolCallStart {
                    id: "call_a".into(),
                    name: "add".into()
                },
                DeltaEvent::ToolCallStart {
                    id: "call_b".into(),
                    name: "mul".into()
                },
                DeltaEvent::ToolCallDelta {
                    id: "call_b".into(),
                    partial_arguments: "{\"a\":2}".into()
                },
                DeltaEvent::ToolCallDelta {
                    id: "call_a".into(),
                    partial_arguments: "{\"a\":1}".into()
                },
                DeltaEvent::ToolCallComplete {
                    id: "call_a".into()
                },
                DeltaEvent::ToolCallComplete {
                    id: "call_b".into()
                },
            ]
        );
        assert!(state.open_calls.is_empty());
    }

    #[test]
    fn test_usage_then_done() {
        let mut state = SseState::default();
        let events = feed_all(
            &mut state,
            concat!(
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
                "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":3,\"total_tokens\":12}}\n\n",
                "data: [DONE]\n\n",
            ),
        );
        assert_eq!(
            events,
            vec![
                DeltaEvent::UsageDelta {
                    tokens_in: 9,
                    tokens_out: 3
                },
                DeltaEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_done_closes_dangling_calls() {
        let mut state = SseState::default();
        let events = feed_all(
            &mut state,
            concat!(
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"function\":{\"name\":\"add\"}}]},\"finish_reason\":null}]}\n\n",
                "data: [DONE]\n\n",
            ),
        );
        assert_eq!(
            events[1..],
            [
                DeltaEvent::ToolCallComplete {
                    id: "call_a".into()
                },
                DeltaEvent::TurnComplete
            ]
        );
    }

    #[test]
    fn test_chunk_split_mid_event() {
        let mut state = SseState::default();
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"naïve\"},\"finish_reason\":null}]}\n\n";
        let split = body.find('ï').unwrap() + 1;

        assert!(state.feed(&body.as_bytes()[..split]).is_empty());
        let events = state.feed(&body.as_bytes()[split..]);
        assert_eq!(events[0].as_ref().unwrap(), &DeltaEvent::text("naïve"));
    }

    #[test]
    fn test_invalid_json_payload_is_response_format_error() {
        let mut state = SseState::default();
        let results = state.feed(
            b"data: {\"choices\":[{\"delta\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":null}]}\n\n",
        );

        assert_eq!(results.len(), 2);
        match &results[0] {
            Err(LlmError::ResponseFormat { raw, .. }) => {
                assert_eq!(raw, "{\"choices\":[{\"delta");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(results[1].as_ref().unwrap(), &DeltaEvent::text("ok"));
    }

    #[test]
    fn test_error_payload_is_provider_error() {
        let mut state = SseState::default();
        let results = state.feed(
            b"data: {\"error\":{\"message\":\"The server had an error\",\"type\":\"server_error\"}}\n\n",
        );

        assert_eq!(results.len(), 1);
        assert!(matches!(
            &results[0],
            Err(LlmError::Provider { status: None, body, .. }) if body == "The server had an error"
        ));
    }

    #[test]
    fn test_invalid_utf8_dropped() {
        let mut state = SseState::default();
        let mut body = b"data: {\"choices\":[{\"delta\":{\"content\":\"a".to_vec();
        body.push(0xFF);
        body.extend_from_slice(b"b\"},\"finish_reason\":null}]}\n\n");

        let events = state.feed(&body);
        assert_eq!(events[0].as_ref().unwrap(), &DeltaEvent::text("ab"));
    }

    #[test]
    fn test_full_stream_aggregates() {
        let mut state = SseState::default();
        let mut agg = Aggregator::new();
        for event in feed_all(
            &mut state,
            concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Adding.\"},\"finish_reason\":null}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"function\":{\"name\":\"add\",\"arguments\":\"{\\\"a\\\":\"}}]},\"finish_reason\":null}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"1}\"}}]},\"finish_reason\":null}]}\n\n",
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
                "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":20,\"completion_tokens\":7}}\n\n",
                "data: [DONE]\n\n",
            ),
        ) {
            agg.push(event).unwrap();
        }

        let turn = agg.finish().unwrap();
        assert_eq!(turn.text(), "Adding.");
        assert_eq!(turn.tool_requests().next().unwrap().arguments["a"], 1);
        assert_eq!(turn.tokens_in(), 20);
        assert_eq!(turn.tokens_out(), 7);
    }
}
