//! Ollama `/api/chat` wire types.
//!
//! Private to the crate; [`convert`](crate::convert) maps them to and from
//! `parley` types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Request types ──────────────────────────────────────────────────

/// Body of `POST /api/chat`.
#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub model: &'a str,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Options>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool<'a>>,
    /// JSON schema the reply must conform to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Message {
    pub role: &'static str,
    pub content: String,
    /// Raw base64 image data, without a `data:` prefix.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Name of the tool whose result this `tool` message carries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    pub(crate) fn text(role: &'static str, content: String) -> Self {
        Self {
            role,
            content,
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

/// Sampling options.
#[derive(Debug, Serialize)]
pub(crate) struct Options {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

/// Tool call in an outgoing assistant message. Ollama has no call ids.
#[derive(Debug, Serialize)]
pub(crate) struct ToolCallRequest {
    pub function: FunctionCallRequest,
}

#[derive(Debug, Serialize)]
pub(crate) struct FunctionCallRequest {
    pub name: String,
    /// Arguments as a JSON object, not an encoded string.
    pub arguments: Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct Tool<'a> {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: FunctionDef<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FunctionDef<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub parameters: Value,
}

// ── Response types ─────────────────────────────────────────────────

/// Non-streaming reply.
#[derive(Debug, Deserialize)]
pub(crate) struct Response {
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ResponseMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallResponse>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolCallResponse {
    pub function: FunctionCallResponse,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FunctionCallResponse {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Error body, both for failed requests and mid-stream failures.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

// ── Streaming types ────────────────────────────────────────────────

/// One line of the JSON Lines stream.
#[derive(Debug, Deserialize)]
pub(crate) struct StreamChunk {
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_serialization_minimal() {
        let req = Request {
            model: "llama3.2",
            messages: vec![Message::text("user", "Hello".into())],
            stream: false,
            options: None,
            tools: Vec::new(),
            format: None,
        };
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["model"], "llama3.2");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0], json!({"role": "user", "content": "Hello"}));
        assert!(json.get("options").is_none());
        assert!(json.get("tools").is_none());
        assert!(json.get("format").is_none());
    }

    #[test]
    fn test_request_with_options() {
        let req = Request {
            model: "llama3.2",
            messages: vec![],
            stream: true,
            options: Some(Options {
                temperature: Some(0.5),
                num_predict: Some(100),
            }),
            tools: Vec::new(),
            format: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        let temp = json["options"]["temperature"].as_f64().unwrap();
        assert!((temp - 0.5).abs() < 0.001, "expected ~0.5, got {temp}");
        assert_eq!(json["options"]["num_predict"], 100);
    }

    #[test]
    fn test_tool_message_serialization() {
        let msg = Message {
            tool_name: Some("get_weather".into()),
            ..Message::text("tool", "sunny".into())
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            json!({"role": "tool", "content": "sunny", "tool_name": "get_weather"})
        );
    }

    #[test]
    fn test_response_with_tool_calls() {
        let resp: Response = serde_json::from_value(json!({
            "model": "llama3.2",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "function": {"name": "get_weather", "arguments": {"city": "Tokyo"}}
                }]
            },
            "done": true,
            "prompt_eval_count": 10,
            "eval_count": 5
        }))
        .unwrap();

        let message = resp.message.unwrap();
        assert_eq!(message.tool_calls[0].function.name, "get_weather");
        assert_eq!(message.tool_calls[0].function.arguments["city"], "Tokyo");
        assert_eq!(resp.prompt_eval_count, Some(10));
        assert_eq!(resp.eval_count, Some(5));
    }

    #[test]
    fn test_stream_chunk_defaults() {
        let chunk: StreamChunk =
            serde_json::from_value(json!({"message": {"role": "assistant", "content": "Hi"}}))
                .unwrap();
        assert!(!chunk.done);
        assert!(chunk.error.is_none());
        assert_eq!(chunk.message.unwrap().content, "Hi");
    }

    #[test]
    fn test_error_response_deserialization() {
        let err: ErrorResponse =
            serde_json::from_value(json!({"error": "model 'nope' not found"})).unwrap();
        assert_eq!(err.error, "model 'nope' not found");
    }
}
