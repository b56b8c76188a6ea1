//! Conversion between `parley` types and Messages API types.
//!
//! Structured output has no dedicated request field in this API, so a
//! requested [`TypeSpec`] becomes a single tool the model is forced to
//! call; its input is the answer.

use parley::chat::{ContentBlock as Block, Media, MediaSource, Role, ToolRequest, Turn};
use parley::error::LlmError;
use parley::provider::RequestContext;
use parley::schema::{self, CompiledSchema, TypeSpec};
use parley::usage::Usage;

use crate::config::AnthropicConfig;
use crate::types::{
    ContentBlock, ErrorResponse, Message, Request, Response, ResponseContent, Source, Tool,
    ToolChoice,
};

/// Name of the forced tool that carries structured output.
pub(crate) const STRUCTURED_TOOL: &str = "_structured_output";

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

/// Builds a Messages API request.
pub(crate) fn build_request<'a>(
    ctx: &'a RequestContext,
    output: Option<&Output<'_>>,
    config: &'a AnthropicConfig,
    stream: bool,
) -> Request<'a> {
    let (tools, tool_choice) = match output {
        Some(output) => (
            vec![Tool {
                name: STRUCTURED_TOOL,
                description: "Respond with the requested data by calling this tool.",
                input_schema: output.schema.schema().clone(),
            }],
            Some(ToolChoice {
                choice_type: "tool",
                name: Some(STRUCTURED_TOOL),
            }),
        ),
        None => (
            ctx.tools
                .iter()
                .map(|t| Tool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: schema::compile(&t.parameters),
                })
                .collect(),
            None,
        ),
    };

    Request {
        model: &config.model,
        messages: convert_turns(&ctx.turns),
        max_tokens: ctx.max_tokens.unwrap_or(config.max_tokens),
        temperature: ctx.temperature,
        system: system_prompt(ctx),
        stream: stream.then_some(true),
        tools,
        tool_choice,
    }
}

/// The top-level system prompt: the context's prompt followed by the text
/// of any system turns.
fn system_prompt(ctx: &RequestContext) -> Option<String> {
    let parts: Vec<String> = ctx
        .system
        .iter()
        .cloned()
        .chain(
            ctx.turns
                .iter()
                .filter(|t| t.role == Role::System)
                .map(Turn::text),
        )
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

fn convert_turns(turns: &[Turn]) -> Vec<Message> {
    turns
        .iter()
        .filter(|t| t.role != Role::System)
        .map(|t| Message {
            role: match t.role {
                Role::Assistant => "assistant",
                _ => "user",
            },
            content: t.blocks.iter().map(convert_block).collect(),
        })
        .collect()
}

fn convert_block(block: &Block) -> ContentBlock {
    match block {
        Block::Text { text } => ContentBlock::Text { text: text.clone() },
        Block::Image(media) => ContentBlock::Image {
            source: convert_source(media),
        },
        Block::Document(media) => ContentBlock::Document {
            source: convert_source(media),
        },
        Block::ToolRequest(req) => ContentBlock::ToolUse {
            id: req.id.clone(),
            name: req.name.clone(),
            input: if req.arguments.is_object() {
                req.arguments.clone()
            } else {
                serde_json::Value::Object(serde_json::Map::new())
            },
        },
        Block::ToolResult(res) => ContentBlock::ToolResult {
            tool_use_id: res.id.clone(),
            content: res.content_text(),
            is_error: res.is_error(),
        },
        // The forced call that produced it was never answered, so replay
        // the value as plain text.
        Block::StructuredOutput { value, .. } => ContentBlock::Text {
            text: value.to_string(),
        },
    }
}

fn convert_source(media: &Media) -> Source {
    match &media.source {
        MediaSource::Base64(data) => Source::Base64 {
            media_type: media.mime_type.clone(),
            data: data.clone(),
        },
        MediaSource::Url(url) => Source::Url { url: url.clone() },
    }
}

// ── Response conversion ──────────────────────────────────────────────

/// Converts a response into an assistant turn.
///
/// With `output`, the forced tool call becomes a structured-output block
/// holding the unwrapped value.
pub(crate) fn convert_response(
    resp: Response,
    output: Option<&Output<'_>>,
) -> Result<Turn, LlmError> {
    let mut blocks = Vec::with_capacity(resp.content.len());
    for content in resp.content {
        match content {
            ResponseContent::Text { text } => blocks.push(Block::Text { text }),
            ResponseContent::ToolUse { id, name, input } => match output {
                Some(output) if name == STRUCTURED_TOOL => {
                    blocks.push(Block::StructuredOutput {
                        value: output.schema.unwrap_value(input)?,
                        spec: output.spec.clone(),
                    });
                }
                _ => blocks.push(Block::ToolRequest(ToolRequest::new(id, name, input))),
            },
            ResponseContent::Other => {}
        }
    }
    if output.is_some() && !blocks.iter().any(|b| matches!(b, Block::StructuredOutput { .. })) {
        tracing::warn!("structured output requested but the forced tool was not called");
    }
    Ok(Turn::new(Role::Assistant, blocks).with_usage(Usage::new(
        resp.usage.input_tokens,
        resp.usage.output_tokens,
    )))
}

// ── Error conversion ─────────────────────────────────────────────────

/// Converts an HTTP status and error body into an `LlmError`.
pub(crate) fn convert_error(status: http::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map_or_else(|_| body.to_string(), |e| e.error.message);
    LlmError::Provider {
        status: Some(status),
        body: message,
        retryable: matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 529),
    }
}
