use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by functions the model asks us to run
#[non_exhaustive]
#[derive(Error, Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum AgentError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Reasons an `<invoke>` fragment could not become a tool call
#[derive(Error, Debug)]
pub enum MarkupError {
    #[error("Invocation has no <tool_name>")]
    MissingToolName,

    #[error("Could not encode invocation parameters: {0}")]
    Arguments(#[from] serde_json::Error),
}

/// Errors surfaced to whoever drives a conversation through the LLM
#[derive(Error, Debug)]
pub enum LlmError {
    /// Transport failures (auth, network, rate limits) are passed through untouched
    #[error(transparent)]
    Provider(#[from] anyhow::Error),

    #[error("Model kept calling tools after {0} rounds")]
    MaxRoundsExceeded(usize),

    #[error("Failed to render prompt: {0}")]
    Prompt(#[from] tera::Error),
}

pub type LlmResult<T> = Result<T, LlmError>;
