use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

use claude_fc::{
    claude::{Claude, ClaudeConfig},
    conversation::Conversation,
    errors::{AgentError, LlmError},
    functions::{FnFunction, FunctionRegistry},
    llm::Llm,
    metrics::Metrics,
    models::{message::Message, role::Role, tool::Tool},
    providers::base::{Completion, CompletionRequest, Provider, Usage},
};

/// Replays one scripted reply per call, as a whole completion or as deltas
struct ScriptedProvider {
    replies: Mutex<VecDeque<Vec<&'static str>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Vec<&'static str>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn next_reply(&self, request: &CompletionRequest) -> Vec<&'static str> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies.lock().unwrap().pop_front().unwrap_or_default()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<(Completion, Usage)> {
        let text = self.next_reply(request).concat();
        Ok((Completion::assistant(text), Usage::default()))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<BoxStream<'static, Result<String>>> {
        let deltas = self.next_reply(request);
        Ok(stream::iter(deltas.into_iter().map(|delta| Ok(delta.to_string()))).boxed())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn functions() -> FunctionRegistry {
    let weather = Tool::new(
        "get_weather",
        "Get the current weather for a city",
        json!({
            "type": "object",
            "required": ["city"],
            "properties": {
                "city": {"type": "string"},
                "unit": {"type": "string"}
            }
        }),
    );
    let convert = Tool::new(
        "to_fahrenheit",
        "Convert celsius to fahrenheit",
        json!({
            "type": "object",
            "required": ["celsius"],
            "properties": {"celsius": {"type": "number"}}
        }),
    );

    FunctionRegistry::new()
        .with(FnFunction::from_sync(weather, |arguments| {
            let city = arguments.get("city").and_then(Value::as_str).unwrap_or_default();
            Ok(format!("{city}: 20 degrees, clear"))
        }))
        .with(FnFunction::new(convert, |arguments| async move {
            let celsius = arguments
                .get("celsius")
                .and_then(Value::as_f64)
                .ok_or_else(|| AgentError::InvalidParameters("celsius is required".into()))?;
            Ok::<_, AgentError>(format!("{}", celsius * 9.0 / 5.0 + 32.0))
        }))
}

const WEATHER_CALL: [&str; 9] = [
    "I'll check the weather. ",
    "<function",
    "_calls",
    ">",
    "<invoke",
    "><tool_name>get_weather</tool_name>",
    "<parameters><city>Paris</city></parameters>",
    "</invoke",
    ">",
];

const CONVERT_CALL: [&str; 5] = [
    "<function",
    "_calls",
    ">",
    "<invoke><tool_name>to_fahrenheit</tool_name><parameters><celsius>20</celsius></parameters>",
    "</invoke>",
];

fn setup(replies: Vec<Vec<&'static str>>) -> (Claude<ScriptedProvider>, Conversation) {
    init_tracing();
    let claude = Claude::new(ScriptedProvider::new(replies), ClaudeConfig::default())
        .with_functions(functions());
    let system = claude
        .system_message("You are a weather assistant.")
        .expect("system prompt renders");
    let conversation = Conversation::from(vec![
        system,
        Message::user("How warm is Paris in fahrenheit?"),
    ]);
    (claude, conversation)
}

#[tokio::test]
async fn test_chained_tool_rounds() -> Result<()> {
    let (claude, mut conversation) = setup(vec![
        WEATHER_CALL.to_vec(),
        CONVERT_CALL.to_vec(),
        vec!["It is 68 degrees fahrenheit in Paris."],
    ]);
    let mut metrics = Metrics::new();

    let output = claude.respond(&mut conversation, &mut metrics).await?;
    assert_eq!(
        output,
        "I'll check the weather. It is 68 degrees fahrenheit in Paris."
    );
    assert_eq!(metrics.calls(), 3);

    let results: Vec<String> = conversation
        .messages()
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content_string())
        .filter(|content| content.starts_with("<function_results>"))
        .collect();
    assert_eq!(
        results,
        vec![
            "<function_results><result><tool_name>get_weather</tool_name><stdout>Paris: 20 degrees, clear</stdout></result></function_results>",
            "<function_results><result><tool_name>to_fahrenheit</tool_name><stdout>68</stdout></result></function_results>",
        ]
    );

    let requests = claude.provider().requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 3);
    for request in &requests {
        assert!(request.system.as_deref().unwrap_or_default().contains("<tool_name>to_fahrenheit</tool_name>"));
        assert_eq!(request.stop_sequences[0], "</function_calls>");
    }
    Ok(())
}

#[tokio::test]
async fn test_streamed_chained_tool_rounds() -> Result<()> {
    let (claude, mut conversation) = setup(vec![
        WEATHER_CALL.to_vec(),
        CONVERT_CALL.to_vec(),
        vec!["It is ", "68 degrees", " fahrenheit in Paris."],
    ]);
    let mut metrics = Metrics::new();

    let chunks: Vec<String> = claude
        .respond_stream(&mut conversation, &mut metrics)
        .map(|chunk| chunk.map_err(anyhow::Error::from))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_>>()?;

    assert_eq!(
        chunks.concat(),
        "I'll check the weather. It is 68 degrees fahrenheit in Paris."
    );
    assert_eq!(metrics.calls(), 3);

    // every assistant turn was stored, markup included
    let assistant: Vec<&Message> = conversation
        .messages()
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .collect();
    assert_eq!(assistant.len(), 3);
    assert_eq!(assistant[0].tool_calls()[0].name(), "get_weather");
    assert_eq!(assistant[1].tool_calls()[0].name(), "to_fahrenheit");
    assert!(!assistant[2].has_tool_calls());
    assert!(assistant.iter().all(|m| m.metrics.contains_key("time")));
    Ok(())
}

#[tokio::test]
async fn test_runaway_tool_calls_are_bounded() {
    init_tracing();
    let config = ClaudeConfig {
        max_rounds: 3,
        ..Default::default()
    };
    let claude = Claude::new(
        ScriptedProvider::new(vec![CONVERT_CALL.to_vec(); 10]),
        config,
    )
    .with_functions(functions());
    let mut conversation = Conversation::from(vec![Message::user("Keep converting")]);

    let result = claude.respond(&mut conversation, &mut Metrics::new()).await;
    assert!(matches!(result, Err(LlmError::MaxRoundsExceeded(3))));
    assert_eq!(claude.provider().requests.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_conversation_survives_serialization() -> Result<()> {
    let (claude, mut conversation) = setup(vec![
        WEATHER_CALL.to_vec(),
        vec!["Paris is at 20 degrees."],
    ]);
    let mut metrics = Metrics::new();
    claude.respond(&mut conversation, &mut metrics).await?;

    let saved = serde_json::to_string(&conversation)?;
    let restored: Conversation = serde_json::from_str(&saved)?;
    assert_eq!(restored, conversation);

    let mut total = Metrics::new();
    total.merge(metrics);
    assert_eq!(total.calls(), 2);
    Ok(())
}
