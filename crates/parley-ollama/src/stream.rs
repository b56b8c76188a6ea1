//! JSON Lines stream parser for `/api/chat`.
//!
//! Ollama streams one JSON object per line rather than SSE. Tool calls
//! arrive whole, so each one becomes a start, a single delta carrying the
//! encoded arguments, and a completion. The `done: true` line carries the
//! token counts.

use futures::stream::StreamExt;
use parley::error::LlmError;
use parley::stream::{DeltaEvent, DeltaStream};
use serde_json::Value;

use crate::convert::tool_call_id;
use crate::types::StreamChunk;

/// Maximum size for the decode buffer before the stream is aborted.
const MAX_BUF: usize = 16 * 1024 * 1024; // 16 MiB

#[derive(Debug, Default)]
struct LineState {
    buffer: String,
    utf8_buf: Vec<u8>,
    /// Tool calls seen so far, used to number synthesized ids.
    tool_calls: usize,
}

impl LineState {
    fn feed(&mut self, bytes: &[u8]) -> Vec<Result<DeltaEvent, LlmError>> {
        self.utf8_buf.extend_from_slice(bytes);
        if self.utf8_buf.len() + self.buffer.len() > MAX_BUF {
            self.utf8_buf.clear();
            self.buffer.clear();
            return vec![Err(LlmError::ResponseFormat {
                message: "stream buffer exceeded 16 MiB".into(),
                raw: String::new(),
            })];
        }

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
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                results.extend(self.parse_line(line));
            }
        }
        results
    }

    /// A line that is not JSON is a [`LlmError::ResponseFormat`]; JSON of
    /// an unrecognized shape is logged and skipped.
    fn parse_line(&mut self, line: &str) -> Vec<Result<DeltaEvent, LlmError>> {
        let value = match serde_json::from_str::<Value>(line) {
            Ok(value) => value,
            Err(e) => {
                return vec![Err(LlmError::ResponseFormat {
                    message: format!("invalid stream line: {e}"),
                    raw: line.to_owned(),
                })];
            }
        };
        let chunk = match serde_json::from_value::<StreamChunk>(value) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognized stream line");
                return vec![];
            }
        };
        if let Some(error) = chunk.error {
            return vec![Err(LlmError::Provider {
                status: None,
                body: error,
                retryable: false,
            })];
        }

        let mut events = Vec::new();
        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                events.push(DeltaEvent::TextDelta {
                    text: message.content,
                });
            }
            for call in message.tool_calls {
                let id = tool_call_id(&call.function.name, self.tool_calls);
                self.tool_calls += 1;

                let partial_arguments = match call.function.arguments {
                    Value::String(raw) => raw,
                    Value::Null => "{}".into(),
                    arguments => arguments.to_string(),
                };
                events.push(DeltaEvent::ToolCallStart {
                    id: id.clone(),
                    name: call.function.name,
                });
                events.push(DeltaEvent::ToolCallDelta {
                    id: id.clone(),
                    partial_arguments,
                });
                events.push(DeltaEvent::ToolCallComplete { id });
            }
        }

        if chunk.done {
            events.push(DeltaEvent::UsageDelta {
                tokens_in: chunk.prompt_eval_count.unwrap_or(0),
                tokens_out: chunk.eval_count.unwrap_or(0),
            });
            events.push(DeltaEvent::TurnComplete);
        }
        events.into_iter().map(Ok).collect()
    }
}

/// Converts a streaming HTTP response into a [`DeltaStream`].
pub(crate) fn into_stream(response: reqwest::Response) -> DeltaStream {
    let stream = response
        .bytes_stream()
        .scan(LineState::default(), |state, chunk| {
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

#[cfg(test)]
mod tests {
    use parley::aggregate::Aggregator;

    use super::*;

    fn feed_all(state: &mut LineState, body: &str) -> Vec<DeltaEvent> {
        state
            .feed(body.as_bytes())
            .into_iter()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn test_text_lines() {
        let mut state = LineState::default();
        let events = feed_all(
            &mut state,
            concat!(
                "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
                "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            ),
        );
        assert_eq!(events, vec![DeltaEvent::text("Hel"), DeltaEvent::text("lo")]);
    }

    #[test]
    fn test_done_line_reports_usage() {
        let mut state = LineState::default();
        let events = feed_all(
            &mut state,
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":26,\"eval_count\":8}\n",
        );
        assert_eq!(
            events,
            vec![
                DeltaEvent::UsageDelta {
                    tokens_in: 26,
                    tokens_out: 8
                },
                DeltaEvent::TurnComplete
            ]
        );
    }

    #[test]
    fn test_tool_calls_numbered_across_lines() {
        let mut state = LineState::default();
        let events = feed_all(
            &mut state,
            concat!(
                "{\"message\":{\"role\":\"assistant\",\"content\":\"\",\"tool_calls\":[{\"function\":{\"name\":\"add\",\"arguments\":{\"a\":1}}}]},\"done\":false}\n",
                "{\"message\":{\"role\":\"assistant\",\"content\":\"\",\"tool_calls\":[{\"function\":{\"name\":\"add\",\"arguments\":{\"a\":2}}}]},\"done\":false}\n",
            ),
        );

        assert_eq!(
            events[..3],
            [
                DeltaEvent::ToolCallStart {
                    id: "call_add_0".into(),
                    name: "add".into()
                },
                DeltaEvent::ToolCallDelta {
                    id: "call_add_0".into(),
                    partial_arguments: "{\"a\":1}".into()
                },
                DeltaEvent::ToolCallComplete {
                    id: "call_add_0".into()
                },
            ]
        );
        assert_eq!(
            events[3],
            DeltaEvent::ToolCallStart {
                id: "call_add_1".into(),
                name: "add".into()
            }
        );
    }

    #[test]
    fn test_error_line() {
        let mut state = LineState::default();
        let results = state.feed(b"{\"error\":\"model runner crashed\"}\n");

        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(LlmError::Provider { status, body, .. }) => {
                assert!(status.is_none());
                assert_eq!(body, "model runner crashed");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let mut state = LineState::default();
        let line = "{\"message\":{\"role\":\"assistant\",\"content\":\"naïve\"},\"done\":false}\n";
        let split = line.find('ï').unwrap() + 1;

        assert!(state.feed(&line.as_bytes()[..split]).is_empty());
        let events = state.feed(&line.as_bytes()[split..]);
        assert_eq!(events[0].as_ref().unwrap(), &DeltaEvent::text("naïve"));
    }

    #[test]
    fn test_garbage_line_is_response_format_error() {
        let mut state = LineState::default();
        let results = state.feed(
            b"not json\n{\"message\":{\"role\":\"assistant\",\"content\":\"ok\"},\"done\":false}\n",
        );

        assert_eq!(results.len(), 2);
        match &results[0] {
            Err(LlmError::ResponseFormat { raw, .. }) => assert_eq!(raw, "not json"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(results[1].as_ref().unwrap(), &DeltaEvent::text("ok"));
    }

    #[test]
    fn test_unrecognized_line_skipped() {
        let mut state = LineState::default();
        let events = feed_all(&mut state, "{\"message\":{\"content\":42}}\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_invalid_utf8_dropped() {
        let mut state = LineState::default();
        let mut line = b"{\"message\":{\"role\":\"assistant\",\"content\":\"a".to_vec();
        line.push(0xFF);
        line.extend_from_slice(b"b\"},\"done\":false}\n");

        let events = state.feed(&line);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap(), &DeltaEvent::text("ab"));
    }

    #[test]
    fn test_full_stream_aggregates() {
        let mut state = LineState::default();
        let mut agg = Aggregator::new();
        for event in feed_all(
            &mut state,
            concat!(
                "{\"message\":{\"role\":\"assistant\",\"content\":\"Let me add.\"},\"done\":false}\n",
                "{\"message\":{\"role\":\"assistant\",\"content\":\"\",\"tool_calls\":[{\"function\":{\"name\":\"add\",\"arguments\":{\"a\":1,\"b\":2}}}]},\"done\":false}\n",
                "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"prompt_eval_count\":30,\"eval_count\":12}\n",
            ),
        ) {
            agg.push(event).unwrap();
        }

        let turn = agg.finish().unwrap();
        assert_eq!(turn.text(), "Let me add.");
        let request = turn.tool_requests().next().unwrap();
        assert_eq!(request.id, "call_add_0");
        assert_eq!(request.arguments["b"], 2);
        assert_eq!(turn.tokens_in(), 30);
        assert_eq!(turn.tokens_out(), 12);
    }
}
