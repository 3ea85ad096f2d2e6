use anyhow::{anyhow, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Completion, CompletionRequest, Provider, Usage};
use super::configs::AnthropicProviderConfig;
use crate::models::role::Role;

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let count = |key: &str| {
            data.get("usage")
                .and_then(|usage| usage.get(key))
                .and_then(Value::as_i64)
                .map(|n| n as i32)
        };
        let input_tokens = count("input_tokens");
        let output_tokens = count("output_tokens");
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        };
        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    fn payload(request: &CompletionRequest, stream: bool) -> Result<Value> {
        let mut payload = serde_json::to_value(request)?;
        if stream {
            if let Some(body) = payload.as_object_mut() {
                body.insert("stream".to_string(), json!(true));
            }
        }
        tracing::trace!("Anthropic request: {}", payload);
        Ok(payload)
    }

    async fn post(&self, payload: &Value) -> Result<Response> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.version)
            .json(payload)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                let error_text = response.text().await?;
                Err(anyhow!("Request failed: {} - {}", status, error_text))
            }
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<(Completion, Usage)> {
        let payload = Self::payload(request, false)?;
        let response: Value = self.post(&payload).await?.json().await?;
        tracing::trace!("Anthropic response: {}", response);

        let blocks = response
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("Invalid response format from Anthropic API"))?;
        let text = blocks
            .iter()
            .find(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|block| block.get("text"))
            .and_then(Value::as_str)
            .map(String::from);

        let completion = Completion {
            role: Role::Assistant,
            text,
        };
        Ok((completion, Self::get_usage(&response)))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<BoxStream<'static, Result<String>>> {
        let payload = Self::payload(request, true)?;
        let response = self.post(&payload).await?;
        Ok(Box::pin(text_deltas(response.bytes_stream())))
    }
}

/// Server-sent events from the messages endpoint
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event {
    ContentBlockDelta { delta: Delta },
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Text deltas from a raw SSE body.
///
/// Blocks are split on the raw bytes and only decoded once complete, so a
/// character split across network chunks survives intact.
fn text_deltas<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            buffer.extend_from_slice(chunk?.as_ref());
            while let Some(end) = block_end(&buffer) {
                let block: Vec<u8> = buffer.drain(..end).collect();
                if let Some(delta) = parse_sse_block(&decode(&block)) {
                    yield delta?;
                }
            }
        }
        let rest = decode(&buffer);
        if !rest.trim().is_empty() {
            if let Some(delta) = parse_sse_block(&rest) {
                yield delta?;
            }
        }
    }
}

/// End of the first complete event block, separator included
fn block_end(buffer: &[u8]) -> Option<usize> {
    let find = |separator: &[u8]| {
        buffer
            .windows(separator.len())
            .position(|window| window == separator)
            .map(|pos| pos + separator.len())
    };
    match (find(b"\n\n"), find(b"\r\n\r\n")) {
        (Some(lf), Some(crlf)) => Some(lf.min(crlf)),
        (lf, crlf) => lf.or(crlf),
    }
}

fn decode(block: &[u8]) -> String {
    String::from_utf8_lossy(block).replace("\r\n", "\n")
}

/// Text carried by one SSE block, if any. `error` events become errors.
fn parse_sse_block(block: &str) -> Option<Result<String>> {
    let data = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .last()?;

    match serde_json::from_str::<Event>(data) {
        Ok(Event::ContentBlockDelta {
            delta: Delta::TextDelta { text },
        }) => Some(Ok(text)),
        Ok(Event::Error { error }) => Some(Err(anyhow!(
            "Stream error: {} - {}",
            error.kind,
            error.message
        ))),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Failed to parse Anthropic event: {}, data: {}", e, data);
            None
        }
    }
}
