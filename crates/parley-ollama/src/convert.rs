//! Conversion between `parley` types and Ollama API types.

use std::collections::HashMap;

use parley::chat::{ContentBlock as Block, MediaSource, Role, ToolRequest, Turn};
use parley::error::LlmError;
use parley::provider::RequestContext;
use parley::schema::{self, CompiledSchema, TypeSpec};
use parley::usage::Usage;
use serde_json::Value;

use crate::config::OllamaConfig;
use crate::types::{
    ErrorResponse, FunctionCallRequest, FunctionDef, Message, Options, Request, Response,
    Tool, ToolCallRequest, ToolCallResponse,
};

/// The compiled output schema, when the request asks for one.
///
/// `format` takes any schema, so the root is never wrapped.
pub(crate) struct Output<'a> {
    pub spec: &'a TypeSpec,
    pub schema: CompiledSchema,
}

impl<'a> Output<'a> {
    pub(crate) fn from_context(ctx: &'a RequestContext) -> Result<Option<Self>, LlmError> {
        ctx.output
            .as_ref()
            .map(|spec| {
                Ok(Self {
                    spec,
                    schema: CompiledSchema::new(spec, false)?,
                })
            })
            .transpose()
    }
}

/// Id for the `index`-th tool call of a reply. Ollama does not assign ids.
pub(crate) fn tool_call_id(name: &str, index: usize) -> String {
    format!("call_{name}_{index}")
}

// ── Request conversion ───────────────────────────────────────────────

/// Builds an `/api/chat` request.
pub(crate) fn build_request<'a>(
    ctx: &'a RequestContext,
    output: Option<&Output<'_>>,
    config: &'a OllamaConfig,
    stream: bool,
) -> Result<Request<'a>, LlmError> {
    let mut messages = Vec::with_capacity(ctx.turns.len() + 1);
    if let Some(system) = &ctx.system {
        messages.push(Message::text("system", system.clone()));
    }

    // Tool messages are matched by name, so remember which name each
    // request id belongs to.
    let mut tool_names: HashMap<&str, &str> = HashMap::new();
    for turn in &ctx.turns {
        for req in turn.tool_requests() {
            tool_names.insert(&req.id, &req.name);
        }
        convert_turn(turn, &tool_names, &mut messages)?;
    }

    let tools = ctx
        .tools
        .iter()
        .map(|t| Tool {
            tool_type: "function",
            function: FunctionDef {
                name: &t.name,
                description: &t.description,
                parameters: schema::compile(&t.parameters),
            },
        })
        .collect();

    let max_tokens = ctx.max_tokens.or(config.max_tokens);
    let options = (ctx.temperature.is_some() || max_tokens.is_some()).then_some(Options {
        temperature: ctx.temperature,
        num_predict: max_tokens,
    });

    Ok(Request {
        model: &config.model,
        messages,
        stream,
        options,
        tools,
        format: output.map(|o| o.schema.schema().clone()),
    })
}

fn convert_turn(
    turn: &Turn,
    tool_names: &HashMap<&str, &str>,
    messages: &mut Vec<Message>,
) -> Result<(), LlmError> {
    match turn.role {
        Role::System => messages.push(Message::text("system", turn.text())),
        Role::Assistant => {
            let tool_calls = turn
                .tool_requests()
                .map(|req| ToolCallRequest {
                    function: FunctionCallRequest {
                        name: req.name.clone(),
                        arguments: if req.arguments.is_object() {
                            req.arguments.clone()
                        } else {
                            Value::Object(serde_json::Map::new())
                        },
                    },
                })
                .collect();
            messages.push(Message {
                tool_calls,
                ..Message::text("assistant", text_content(turn))
            });
        }
        Role::User => {
            for result in turn.tool_results() {
                messages.push(Message {
                    tool_name: tool_names.get(result.id.as_str()).map(|n| (*n).to_owned()),
                    ..Message::text("tool", result.content_text())
                });
            }

            let mut images = Vec::new();
            for block in &turn.blocks {
                match block {
                    Block::Image(media) => match &media.source {
                        MediaSource::Base64(data) => images.push(data.clone()),
                        MediaSource::Url(_) => return Err(unsupported("remote images")),
                    },
                    Block::Document(_) => return Err(unsupported("documents")),
                    _ => {}
                }
            }
            let content = text_content(turn);
            if content.is_empty() && images.is_empty() {
                return Ok(());
            }
            messages.push(Message {
                images,
                ..Message::text("user", content)
            });
        }
    }
    Ok(())
}

/// Text and structured-output blocks flattened into one string.
fn text_content(turn: &Turn) -> String {
    turn.blocks
        .iter()
        .filter_map(|b| match b {
            Block::Text { text } => Some(text.clone()),
            Block::StructuredOutput { value, .. } => Some(value.to_string()),
            _ => None,
        })
        .collect()
}

fn unsupported(what: &str) -> LlmError {
    LlmError::Capability {
        provider: "ollama".into(),
        message: format!("{what} are not supported"),
    }
}

// ── Response conversion ──────────────────────────────────────────────

/// Converts a reply into an assistant turn.
///
/// With `output`, JSON content becomes a structured-output block. Content
/// that does not parse is kept as text.
pub(crate) fn convert_response(
    resp: Response,
    output: Option<&Output<'_>>,
) -> Result<Turn, LlmError> {
    let usage = Usage::new(
        resp.prompt_eval_count.unwrap_or(0),
        resp.eval_count.unwrap_or(0),
    );
    let message = resp.message.unwrap_or_default();

    let mut blocks = Vec::new();
    if !message.content.is_empty() {
        let structured = output.and_then(|o| {
            serde_json::from_str::<Value>(&message.content)
                .ok()
                .map(|value| (o, value))
        });
        match structured {
            Some((output, value)) => blocks.push(Block::StructuredOutput {
                value: output.schema.unwrap_value(value)?,
                spec: output.spec.clone(),
            }),
            None => blocks.push(Block::Text {
                text: message.content,
            }),
        }
    }
    blocks.extend(
        tool_requests(message.tool_calls)
            .into_iter()
            .map(Block::ToolRequest),
    );

    Ok(Turn::new(Role::Assistant, blocks).with_usage(usage))
}

/// Some models send arguments as an encoded string rather than an object.
fn tool_requests(calls: Vec<ToolCallResponse>) -> Vec<ToolRequest> {
    calls
        .into_iter()
        .enumerate()
        .map(|(i, call)| {
            let id = tool_call_id(&call.function.name, i);
            match call.function.arguments {
                Value::String(raw) => ToolRequest::from_raw(id, call.function.name, &raw),
                Value::Null => ToolRequest::new(
                    id,
                    call.function.name,
                    Value::Object(serde_json::Map::new()),
                ),
                arguments => ToolRequest::new(id, call.function.name, arguments),
            }
        })
        .collect()
}

// ── Error conversion ─────────────────────────────────────────────────

/// Converts an HTTP status and error body into an `LlmError`.
pub(crate) fn convert_error(status: http::StatusCode, body: &str) -> LlmError {
    let message =
        serde_json::from_str::<ErrorResponse>(body).map_or_else(|_| body.to_string(), |e| e.error);
    LlmError::Provider {
        status: Some(status),
        body: message,
        retryable: matches!(status.as_u16(), 429 | 500 | 502 | 503),
    }
}
