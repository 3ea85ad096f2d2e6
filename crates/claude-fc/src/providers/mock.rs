use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::models::role::Role;
use crate::providers::base::{Completion, CompletionRequest, Provider, Usage};

/// A mock provider that replays scripted completions and delta sequences
/// and remembers every request it was sent
#[derive(Default)]
pub struct MockProvider {
    completions: Mutex<VecDeque<Completion>>,
    streams: Mutex<VecDeque<Vec<String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    error: Option<String>,
}

impl MockProvider {
    /// Create a mock provider with a sequence of complete responses
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            completions: Mutex::new(responses.into_iter().map(Completion::assistant).collect()),
            ..Default::default()
        }
    }

    /// Create a mock provider with a sequence of streamed responses, one delta list per call
    pub fn streaming(responses: Vec<Vec<&str>>) -> Self {
        Self {
            streams: Mutex::new(
                responses
                    .into_iter()
                    .map(|deltas| deltas.into_iter().map(String::from).collect())
                    .collect(),
            ),
            ..Default::default()
        }
    }

    /// Every call fails with this message
    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Queue a completion whose content is missing
    pub fn push_empty_completion(&self) {
        self.completions.lock().unwrap().push_back(Completion {
            role: Role::Assistant,
            text: None,
        });
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, request: &CompletionRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.error {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<(Completion, Usage)> {
        self.record(request)?;
        let completion = self
            .completions
            .lock()
            .unwrap()
            .pop_front()
            // Return empty response if no more pre-configured responses
            .unwrap_or_else(|| Completion::assistant(""));
        Ok((completion, Usage::default()))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<BoxStream<'static, Result<String>>> {
        self.record(request)?;
        let deltas = self.streams.lock().unwrap().pop_front().unwrap_or_default();
        Ok(stream::iter(deltas.into_iter().map(Ok)).boxed())
    }
}
