//! Live tests against the `OpenAI` API.
//!
//! These need `OPENAI_API_KEY` and are skipped (not failed) without it.
//!
//! ```sh
//! OPENAI_API_KEY=sk-... cargo test -p parley-openai --test integration -- --ignored
//! ```

use futures::StreamExt;
use parley::provider::{Provider, RequestContext};
use parley::tool::{ToolError, tool_fn};
use parley::{Chat, LlmError, ToolDefinition, Turn, TypeSpec};
use parley_openai::{OpenAiConfig, OpenAiProvider};
use serde_json::Value;

fn test_provider() -> Option<OpenAiProvider> {
    let mut config = OpenAiConfig::from_env().ok()?;
    if std::env::var("OPENAI_MODEL").is_err() {
        config.model = "gpt-4o-mini".into();
    }
    config.max_tokens = Some(256);
    Some(OpenAiProvider::new(config))
}

macro_rules! skip_without_key {
    () => {
        match test_provider() {
            Some(p) => p,
            None => {
                eprintln!("OPENAI_API_KEY not set, skipping integration test");
                return;
            }
        }
    };
}

#[tokio::test]
#[ignore = "live API"]
async fn test_simple_chat() {
    let provider = skip_without_key!();
    let mut chat = Chat::new(provider);

    let answer = chat
        .chat("What is 2+2? Reply with just the number.", false)
        .await
        .unwrap();

    assert!(answer.contains('4'), "expected '4' in: {answer}");
    assert!(chat.total_usage().output_tokens > 0);
}

#[tokio::test]
#[ignore = "live API"]
async fn test_stream_reports_usage() {
    let provider = skip_without_key!();
    let mut chat = Chat::new(provider);

    let mut text = String::new();
    {
        let mut stream = chat.stream("Count from 1 to 5, separated by spaces.");
        while let Some(fragment) = stream.next().await {
            text.push_str(&fragment.unwrap());
        }
    }

    assert!(text.contains('5'), "expected '5' in: {text}");
    let last = chat.last_turn().unwrap();
    assert_eq!(last.text(), text);
    assert!(last.tokens_in() > 0);
}

#[tokio::test]
#[ignore = "live API"]
async fn test_tool_round_trip() {
    let provider = skip_without_key!();
    let mut chat = Chat::new(provider);
    chat.register_tool(tool_fn(
        ToolDefinition::new(
            "add",
            "Add two integers",
            TypeSpec::object()
                .field("a", TypeSpec::integer())
                .field("b", TypeSpec::integer())
                .build(),
        ),
        |input: Value| async move {
            Ok::<_, ToolError>(input["a"].as_i64().unwrap_or(0) + input["b"].as_i64().unwrap_or(0))
        },
    ))
    .unwrap();

    let answer = chat
        .chat("Use the add tool to compute 17 + 25.", false)
        .await
        .unwrap();

    assert!(answer.contains("42"), "expected 42 in: {answer}");
}

#[tokio::test]
#[ignore = "live API"]
async fn test_extract_with_optional_field() {
    let provider = skip_without_key!();
    let mut chat = Chat::new(provider);
    let spec = TypeSpec::object()
        .field("name", TypeSpec::string())
        .field("age", TypeSpec::integer())
        .optional("email", TypeSpec::string())
        .build();

    let value = chat
        .extract_data("Susan is 13 years old.", &spec)
        .await
        .unwrap();

    assert_eq!(value["name"], "Susan");
    assert_eq!(value["age"], 13);
}

#[tokio::test]
#[ignore = "live API"]
async fn test_extract_enum_root() {
    let provider = skip_without_key!();
    let mut chat = Chat::new(provider);
    let spec = TypeSpec::enumeration(["positive", "negative"]);

    let value = chat
        .extract_data("Classify the sentiment: 'I love this!'", &spec)
        .await
        .unwrap();

    assert_eq!(value, "positive");
}

#[tokio::test]
#[ignore = "live API"]
async fn test_bad_key_is_provider_error() {
    if test_provider().is_none() {
        eprintln!("OPENAI_API_KEY not set, skipping integration test");
        return;
    }
    let provider = OpenAiProvider::new(OpenAiConfig {
        api_key: "sk-invalid".into(),
        model: "gpt-4o-mini".into(),
        ..Default::default()
    });
    let ctx = RequestContext {
        turns: vec![Turn::user("hi")],
        ..Default::default()
    };

    let err = provider.send(&ctx).await.unwrap_err();
    assert!(matches!(
        err,
        LlmError::Provider { status: Some(status), .. } if status == http::StatusCode::UNAUTHORIZED
    ));
}
