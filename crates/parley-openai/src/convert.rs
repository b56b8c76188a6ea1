//! Conversion between `parley` types and Chat Completions API types.

use parley::chat::{ContentBlock as Block, Media, MediaSource, Role, ToolRequest, Turn};
use parley::error::LlmError;
use parley::provider::RequestContext;
use parley::schema::{self, CompiledSchema, TypeSpec};
use parley::usage::Usage;

use crate::config::OpenAiConfig;
use crate::types::{
    ContentPart, ErrorResponse, FileData, FunctionCallRequest, FunctionDef, ImageUrl,
    JsonSchemaFormat, Message, MessageContent, Request, Response, ResponseFormat, StreamOptions,
    Tool, ToolCallRequest,
};

/// The compiled output schema, when the request asks for one.
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
                    schema: CompiledSchema::new(spec, true)?,
                })
            })
            .transpose()
    }
}

// ── Request conversion ───────────────────────────────────────────────

/// Builds a Chat Completions request.
///
/// `strict` schema enforcement is only requested when every object in the
/// spec marks all of its fields required; the API rejects strict schemas
/// with optional fields.
pub(crate) fn build_request<'a>(
    ctx: &'a RequestContext,
    output: Option<&Output<'_>>,
    config: &'a OpenAiConfig,
    stream: bool,
) -> Result<Request<'a>, LlmError> {
    let mut messages = Vec::with_capacity(ctx.turns.len() + 1);
    if let Some(system) = &ctx.system {
        messages.push(Message::text("system", system.clone()));
    }
    for turn in &ctx.turns {
        convert_turn(turn, &mut messages)?;
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

    let response_format = output.map(|output| ResponseFormat {
        format_type: "json_schema",
        json_schema: JsonSchemaFormat {
            name: "output",
            schema: output.schema.schema().clone(),
            strict: output.spec.all_fields_required(),
        },
    });

    Ok(Request {
        model: &config.model,
        messages,
        temperature: ctx.temperature,
        max_completion_tokens: ctx.max_tokens.or(config.max_tokens),
        stream: stream.then_some(true),
        stream_options: stream.then_some(StreamOptions {
            include_usage: true,
        }),
        tools,
        response_format,
    })
}

/// Appends the messages for one turn.
///
/// Tool results become individual `tool` messages; any other content in
/// the same user turn follows them as a regular user message.
fn convert_turn(turn: &Turn, messages: &mut Vec<Message>) -> Result<(), LlmError> {
    match turn.role {
        Role::System => messages.push(Message::text("system", turn.text())),
        Role::Assistant => {
            let text: String = turn
                .blocks
                .iter()
                .filter_map(|b| match b {
                    Block::Text { text } => Some(text.clone()),
                    Block::StructuredOutput { value, .. } => Some(value.to_string()),
                    _ => None,
                })
                .collect();
            let tool_calls = turn
                .tool_requests()
                .map(|req| ToolCallRequest {
                    id: req.id.clone(),
                    call_type: "function",
                    function: FunctionCallRequest {
                        name: req.name.clone(),
                        arguments: if req.arguments.is_object() {
                            req.arguments.to_string()
                        } else {
                            "{}".into()
                        },
                    },
                })
                .collect();
            messages.push(Message {
                role: "assistant",
                content: (!text.is_empty()).then_some(MessageContent::Text(text)),
                tool_calls,
                tool_call_id: None,
            });
        }
        Role::User => {
            for result in turn.tool_results() {
                messages.push(Message {
                    role: "tool",
                    content: Some(MessageContent::Text(result.content_text())),
                    tool_calls: Vec::new(),
                    tool_call_id: Some(result.id.clone()),
                });
            }
            let parts = turn
                .blocks
                .iter()
                .filter_map(|b| convert_user_block(b).transpose())
                .collect::<Result<Vec<_>, _>>()?;
            let content = match <[ContentPart; 1]>::try_from(parts) {
                Ok([ContentPart::Text { text }]) => MessageContent::Text(text),
                Ok(single) => MessageContent::Parts(single.into()),
                Err(parts) if parts.is_empty() => return Ok(()),
                Err(parts) => MessageContent::Parts(parts),
            };
            messages.push(Message {
                role: "user",
                content: Some(content),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
    }
    Ok(())
}

fn convert_user_block(block: &Block) -> Result<Option<ContentPart>, LlmError> {
    Ok(match block {
        Block::Text { text } => Some(ContentPart::Text { text: text.clone() }),
        Block::StructuredOutput { value, .. } => Some(ContentPart::Text {
            text: value.to_string(),
        }),
        Block::Image(media) => Some(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: media_url(media),
            },
        }),
        Block::Document(media) => {
            let MediaSource::Base64(_) = &media.source else {
                return Err(LlmError::Capability {
                    provider: "openai".into(),
                    message: "documents must be inline; file URLs are not supported".into(),
                });
            };
            Some(ContentPart::File {
                file: FileData {
                    filename: document_filename(&media.mime_type),
                    file_data: media_url(media),
                },
            })
        }
        Block::ToolRequest(_) | Block::ToolResult(_) => None,
    })
}

/// A remote URL as-is, or inline data as a `data:` URL.
fn media_url(media: &Media) -> String {
    match &media.source {
        MediaSource::Base64(data) => format!("data:{};base64,{data}", media.mime_type),
        MediaSource::Url(url) => url.clone(),
    }
}

fn document_filename(mime_type: &str) -> String {
    let ext = mime_type.rsplit('/').next().unwrap_or("bin");
    format!("document.{ext}")
}

// ── Response conversion ──────────────────────────────────────────────

/// Converts a response into an assistant turn.
///
/// With `output`, JSON text content becomes a structured-output block
/// holding the unwrapped value. Text that does not parse is kept as text.
pub(crate) fn convert_response(
    resp: Response,
    output: Option<&Output<'_>>,
) -> Result<Turn, LlmError> {
    let usage = resp.usage.map_or_else(Usage::default, |u| {
        Usage::new(u.prompt_tokens, u.completion_tokens)
    });
    let Some(choice) = resp.choices.into_iter().next() else {
        return Err(LlmError::ResponseFormat {
            message: "response has no choices".into(),
            raw: String::new(),
        });
    };
    let message = choice.message;

    if let (Some(refusal), Some(_)) = (&message.refusal, output) {
        return Err(LlmError::ResponseFormat {
            message: format!("model refused structured output: {refusal}"),
            raw: refusal.clone(),
        });
    }

    let mut blocks = Vec::new();
    if let Some(text) = message.content.filter(|t| !t.is_empty()) {
        let structured = output.and_then(|o| {
            serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .map(|value| (o, value))
        });
        match structured {
            Some((output, value)) => blocks.push(Block::StructuredOutput {
                value: output.schema.unwrap_value(value)?,
                spec: output.spec.clone(),
            }),
            None => blocks.push(Block::Text { text }),
        }
    }
    for call in message.tool_calls {
        blocks.push(Block::ToolRequest(ToolRequest::from_raw(
            call.id,
            call.function.name,
            &call.function.arguments,
        )));
    }

    Ok(Turn::new(Role::Assistant, blocks).with_usage(usage))
}

// ── Error conversion ─────────────────────────────────────────────────

/// Converts an HTTP status and error body into an `LlmError`.
pub(crate) fn convert_error(status: http::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map_or_else(|_| body.to_string(), |e| e.error.message);
    LlmError::Provider {
        status: Some(status),
        body: message,
        retryable: matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504),
    }
}
