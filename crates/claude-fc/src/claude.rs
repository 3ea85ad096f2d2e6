use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Deserialize;
use std::time::Instant;

use crate::conversation::Conversation;
use crate::dispatcher::{self, FunctionCall};
use crate::errors::{LlmError, LlmResult};
use crate::functions::{Function, FunctionRegistry};
use crate::llm::Llm;
use crate::markup::{self, FUNCTION_CALLS_CLOSE, FUNCTION_CALLS_OPEN};
use crate::metrics::Metrics;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::ToolCall;
use crate::prompt_template;
use crate::providers::base::{CompletionRequest, Provider, ProviderMessage};
use crate::stream_parser::StreamParser;

pub const CLAUDE_MODEL: &str = "claude-3-opus-20240229";

/// Returned when the model answered with no content at all
pub const FALLBACK_RESPONSE: &str = "Something went wrong, please try again.";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClaudeConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    /// Sent in addition to `</function_calls>`, which is always a stop sequence
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    /// Execute the tool calls the model asks for
    #[serde(default = "default_run_tools")]
    pub run_tools: bool,
    /// Include a "Running: ..." note in the output before tools run
    #[serde(default)]
    pub show_tool_calls: bool,
    /// Tool execution rounds allowed in a single response
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: Vec::new(),
            run_tools: default_run_tools(),
            show_tool_calls: false,
            max_rounds: default_max_rounds(),
        }
    }
}

fn default_model() -> String {
    CLAUDE_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_run_tools() -> bool {
    true
}

fn default_max_rounds() -> usize {
    10
}

/// Claude with function calling layered on top of plain text generation.
///
/// Tools are described in the system prompt, the model answers with
/// `<function_calls>` markup, and the results go back as a user message.
pub struct Claude<P> {
    provider: P,
    config: ClaudeConfig,
    functions: FunctionRegistry,
}

impl<P: Provider> Claude<P> {
    pub fn new(provider: P, config: ClaudeConfig) -> Self {
        Self {
            provider,
            config,
            functions: FunctionRegistry::new(),
        }
    }

    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    pub fn add_function<F: Function + 'static>(&mut self, function: F) {
        self.functions.register(function);
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &ClaudeConfig {
        &self.config
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Instructions for the function calling markup, if any functions are registered
    pub fn tool_call_prompt(&self) -> LlmResult<Option<String>> {
        Ok(prompt_template::tool_call_prompt(&self.functions.tools())?)
    }

    /// System message made of the caller's instructions followed by the tool prompt
    pub fn system_message(&self, instructions: &str) -> LlmResult<Message> {
        let content = match self.tool_call_prompt()? {
            Some(prompt) if instructions.trim().is_empty() => prompt,
            Some(prompt) => format!("{}\n\n{}", instructions.trim_end(), prompt),
            None => instructions.to_string(),
        };
        Ok(Message::system(content))
    }

    fn request(&self, conversation: &Conversation) -> CompletionRequest {
        let (system, exchange) = conversation.partition();

        let mut stop_sequences = vec![FUNCTION_CALLS_CLOSE.to_string()];
        for sequence in &self.config.stop_sequences {
            if !stop_sequences.contains(sequence) {
                stop_sequences.push(sequence.clone());
            }
        }

        CompletionRequest {
            model: self.config.model.clone(),
            system: system.and_then(|message| message.content.clone()),
            messages: exchange
                .into_iter()
                .map(|message| ProviderMessage {
                    role: message.role,
                    content: message.content_string(),
                })
                .collect(),
            max_tokens: self.config.max_tokens,
            stop_sequences,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            top_k: self.config.top_k,
        }
    }

    /// Store the model's answer, returning the tool calls to act on
    fn record_assistant(
        &self,
        conversation: &mut Conversation,
        role: Role,
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
        elapsed: f64,
    ) -> Vec<ToolCall> {
        let mut message = Message::new(role, content).with_metric("time", elapsed);
        if !tool_calls.is_empty() {
            message = message.with_tool_calls(tool_calls.clone());
        }
        message.log();
        conversation.push(message);

        if self.config.run_tools {
            tool_calls
        } else {
            Vec::new()
        }
    }

    fn start_round(&self, rounds: &mut usize) -> LlmResult<()> {
        if *rounds >= self.config.max_rounds {
            tracing::warn!("Giving up after {} tool rounds", self.config.max_rounds);
            return Err(LlmError::MaxRoundsExceeded(self.config.max_rounds));
        }
        *rounds += 1;
        Ok(())
    }

    /// Resolve tool calls, telling the model about the ones that cannot run
    fn prepare_calls(&self, tool_calls: &[ToolCall], conversation: &mut Conversation) -> Vec<FunctionCall> {
        let dispatch = dispatcher::resolve_all(tool_calls, &self.functions);
        conversation.extend(dispatch.rejections);
        dispatch.calls
    }

    async fn run_calls(&self, calls: &mut [FunctionCall], conversation: &mut Conversation) {
        let results = dispatcher::run_function_calls(calls).await;
        if let Some(envelope) = markup::function_results(&results) {
            conversation.push(Message::user(envelope));
        }
    }

    fn stream_turns<'a>(
        &'a self,
        conversation: &'a mut Conversation,
        metrics: &'a mut Metrics,
    ) -> impl Stream<Item = LlmResult<String>> + Send + 'a {
        try_stream! {
            tracing::debug!("---------- Claude Response Start ----------");
            let mut rounds = 0;
            loop {
                conversation.log();
                let request = self.request(conversation);
                let started = Instant::now();
                let mut deltas = self.provider.stream(&request).await?;

                let mut parser = StreamParser::new();
                while let Some(delta) = deltas.next().await {
                    let delta = delta?;
                    if let Some(visible) = parser.accept(&delta) {
                        yield visible;
                    }
                }
                let elapsed = metrics.record_response_time(started.elapsed());
                tracing::debug!("Time to generate response: {:.4}s", elapsed);

                parser.finish();
                let tool_calls = parser.tool_calls();
                let tool_calls = self.record_assistant(
                    conversation,
                    Role::Assistant,
                    Some(parser.into_text()),
                    tool_calls,
                    elapsed,
                );
                if tool_calls.is_empty() {
                    break;
                }

                self.start_round(&mut rounds)?;
                let mut calls = self.prepare_calls(&tool_calls, conversation);
                if self.config.show_tool_calls {
                    if let Some(annotation) = dispatcher::running_annotation(&calls) {
                        yield annotation;
                    }
                }
                self.run_calls(&mut calls, conversation).await;
            }
            tracing::debug!("---------- Claude Response End ----------");
        }
    }
}

#[async_trait]
impl<P: Provider> Llm for Claude<P> {
    fn name(&self) -> &str {
        "Claude"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn system_prompt(&self) -> LlmResult<Option<String>> {
        self.tool_call_prompt()
    }

    async fn respond(
        &self,
        conversation: &mut Conversation,
        metrics: &mut Metrics,
    ) -> LlmResult<String> {
        tracing::debug!("---------- Claude Response Start ----------");
        let mut output = String::new();
        let mut rounds = 0;
        loop {
            conversation.log();
            let request = self.request(conversation);
            let started = Instant::now();
            let (completion, usage) = self.provider.complete(&request).await?;
            let elapsed = metrics.record_response_time(started.elapsed());
            tracing::debug!("Time to generate response: {:.4}s", elapsed);
            tracing::debug!("Usage: {:?}", usage);

            let mut content = completion.text;
            let mut tool_calls = Vec::new();
            if let Some(text) = content.as_mut() {
                if text.contains(FUNCTION_CALLS_OPEN) {
                    text.push_str(FUNCTION_CALLS_CLOSE);
                    tool_calls = markup::tool_calls_from_response(text);
                }
            }

            let visible = content.as_deref().map(markup::remove_function_calls);
            let tool_calls = self.record_assistant(
                conversation,
                completion.role,
                content.clone(),
                tool_calls,
                elapsed,
            );
            if tool_calls.is_empty() {
                output.push_str(content.as_deref().unwrap_or(FALLBACK_RESPONSE));
                break;
            }

            self.start_round(&mut rounds)?;
            output.push_str(visible.as_deref().unwrap_or_default());
            let mut calls = self.prepare_calls(&tool_calls, conversation);
            if self.config.show_tool_calls {
                if let Some(annotation) = dispatcher::running_annotation(&calls) {
                    output.push_str(&annotation);
                }
            }
            self.run_calls(&mut calls, conversation).await;
        }
        tracing::debug!("---------- Claude Response End ----------");
        Ok(output)
    }

    fn respond_stream<'a>(
        &'a self,
        conversation: &'a mut Conversation,
        metrics: &'a mut Metrics,
    ) -> BoxStream<'a, LlmResult<String>> {
        Box::pin(self.stream_turns(conversation, metrics))
    }
}
