use serde_json::{Map, Number, Value};
use std::fmt;
use std::sync::Arc;

use crate::functions::{Function, FunctionRegistry};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};

pub const FUNCTION_NOT_FOUND: &str = "Could not find function to call.";

/// Longest string argument shown in full by [`FunctionCall::call_str`]
const MAX_SHOWN_ARGUMENT_CHARS: usize = 100;

/// A tool call bound to the registered function that will run it
#[derive(Clone)]
pub struct FunctionCall {
    pub function: Arc<dyn Function>,
    /// Decoded and validated arguments, absent when the model sent none
    pub arguments: Option<Map<String, Value>>,
    /// Why the call could not be prepared or why it failed
    pub error: Option<String>,
    pub result: Option<String>,
}

impl FunctionCall {
    pub fn new(function: Arc<dyn Function>) -> Self {
        Self {
            function,
            arguments: None,
            error: None,
            result: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.function.definition().name
    }

    /// Human readable `name(k=v, ...)`, eliding long text values
    pub fn call_str(&self) -> String {
        let arguments = self
            .arguments
            .iter()
            .flatten()
            .map(|(key, value)| match value {
                Value::String(text) if text.chars().count() > MAX_SHOWN_ARGUMENT_CHARS => {
                    format!("{key}=...")
                }
                Value::String(text) => format!("{key}={text}"),
                other => format!("{key}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name(), arguments)
    }

    /// Run the function, storing its output in `result` or the failure in `error`
    pub async fn execute(&mut self) -> bool {
        let arguments = self.arguments.clone().unwrap_or_default();
        tracing::debug!("Running: {}", self.call_str());
        match self.function.call(arguments).await {
            Ok(result) => {
                self.result = Some(result);
                true
            }
            Err(e) => {
                tracing::warn!("Function {} failed: {}", self.call_str(), e);
                self.error = Some(e.to_string());
                false
            }
        }
    }
}

impl fmt::Debug for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCall")
            .field("function", &self.name())
            .field("arguments", &self.arguments)
            .field("error", &self.error)
            .field("result", &self.result)
            .finish()
    }
}

/// Bind a tool call to a registered function.
///
/// Returns `None` when no function has that name. Bad arguments still give a
/// `FunctionCall`, with the message for the model in `error`.
pub fn resolve(tool_call: &ToolCall, registry: &FunctionRegistry) -> Option<FunctionCall> {
    let Some(function) = registry.get(tool_call.name()) else {
        tracing::warn!("Function {} not found", tool_call.name());
        return None;
    };

    let mut call = FunctionCall::new(function);
    let raw = tool_call
        .function
        .arguments
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty());

    if let Some(raw) = raw {
        match decode_arguments(raw, call.function.definition()) {
            Ok(arguments) => call.arguments = Some(arguments),
            Err(e) => {
                tracing::warn!("Rejected arguments for {}: {}", tool_call.name(), e);
                call.error = Some(e);
            }
        }
    }
    Some(call)
}

/// Calls that are ready to run, plus the messages explaining those that are not
#[derive(Debug, Default)]
pub struct Dispatch {
    pub calls: Vec<FunctionCall>,
    pub rejections: Vec<Message>,
}

/// Resolve every tool call of one assistant turn, in order
pub fn resolve_all(tool_calls: &[ToolCall], registry: &FunctionRegistry) -> Dispatch {
    let mut dispatch = Dispatch::default();
    for tool_call in tool_calls {
        match resolve(tool_call, registry) {
            None => dispatch.rejections.push(Message::user(FUNCTION_NOT_FOUND)),
            Some(FunctionCall {
                error: Some(error), ..
            }) => dispatch.rejections.push(Message::user(error)),
            Some(call) => dispatch.calls.push(call),
        }
    }
    dispatch
}

/// Execute calls one after another, producing one result message per call
pub async fn run_function_calls(calls: &mut [FunctionCall]) -> Vec<Message> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls.iter_mut() {
        let content = if call.execute().await {
            call.result.clone()
        } else {
            call.error.clone()
        };
        results.push(Message::user(content.unwrap_or_default()).with_tool_call_name(call.name()));
    }
    results
}

/// The "Running: ..." note shown before calls execute
pub fn running_annotation(calls: &[FunctionCall]) -> Option<String> {
    match calls {
        [] => None,
        [call] => Some(format!("- Running: {}\n\n", call.call_str())),
        calls => {
            let mut annotation = String::from("Running:");
            for call in calls {
                annotation.push_str("\n - ");
                annotation.push_str(&call.call_str());
            }
            annotation.push_str("\n\n");
            Some(annotation)
        }
    }
}

fn decode_arguments(raw: &str, tool: &Tool) -> Result<Map<String, Value>, String> {
    let decoded: Value = serde_json::from_str(raw).map_err(|e| {
        format!(
            "Error while decoding function arguments: {e}\n\n Please make sure the arguments are valid JSON and retry."
        )
    })?;
    let Value::Object(arguments) = decoded else {
        return Err(
            "Function arguments are not a valid JSON object.\n\n Please fix and retry.".to_string(),
        );
    };

    let cleaned = arguments
        .into_iter()
        .map(|(key, value)| (key, clean_value(value)))
        .collect();
    validate(tool, cleaned)
        .map_err(|reason| format!("Invalid arguments for {}: {reason}\n\n Please fix and retry.", tool.name))
}

/// Markup only carries text, so literal keywords are turned back into JSON values
fn clean_value(value: Value) -> Value {
    let Value::String(text) = value else {
        return value;
    };
    match text.trim() {
        "none" | "None" | "null" => Value::Null,
        "true" | "True" => Value::Bool(true),
        "false" | "False" => Value::Bool(false),
        trimmed => Value::String(trimmed.to_string()),
    }
}

fn validate(tool: &Tool, arguments: Map<String, Value>) -> Result<Map<String, Value>, String> {
    let declares_properties = tool
        .input_schema
        .get("properties")
        .is_some_and(Value::is_object);

    let mut validated = Map::new();
    for (name, value) in arguments {
        if declares_properties && !tool.has_argument(&name) {
            return Err(format!("unexpected argument '{name}'"));
        }
        let value = match tool.argument_type(&name) {
            Some(kind) => coerce(value, kind)
                .ok_or_else(|| format!("argument '{name}' should be of type {kind}"))?,
            None => value,
        };
        validated.insert(name, value);
    }

    if let Some(missing) = tool
        .required()
        .into_iter()
        .find(|name| !validated.contains_key(*name))
    {
        return Err(format!("missing required argument '{missing}'"));
    }
    Ok(validated)
}

/// Convert a value to the declared JSON schema type where that is lossless
fn coerce(value: Value, kind: &str) -> Option<Value> {
    match (kind, value) {
        (_, Value::Null) => Some(Value::Null),
        ("string", Value::String(text)) => Some(Value::String(text)),
        ("string", Value::Number(n)) => Some(Value::String(n.to_string())),
        ("string", Value::Bool(b)) => Some(Value::String(b.to_string())),
        ("integer", Value::Number(n)) => integer(&n).map(Value::from),
        ("integer", Value::String(text)) => text.parse::<i64>().ok().map(Value::from),
        ("number", Value::Number(n)) => Some(Value::Number(n)),
        ("number", Value::String(text)) => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        ("boolean", Value::Bool(b)) => Some(Value::Bool(b)),
        ("boolean", Value::String(text)) => match text.to_lowercase().as_str() {
            "yes" | "1" => Some(Value::Bool(true)),
            "no" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        ("array", Value::Array(items)) => Some(Value::Array(items)),
        ("array", Value::String(text)) => match serde_json::from_str(&text) {
            Ok(Value::Array(items)) => Some(Value::Array(items)),
            _ => None,
        },
        ("object", Value::Object(fields)) => Some(Value::Object(fields)),
        ("object", Value::String(text)) => match serde_json::from_str(&text) {
            Ok(Value::Object(fields)) => Some(Value::Object(fields)),
            _ => None,
        },
        ("string" | "integer" | "number" | "boolean" | "array" | "object", _) => None,
        (_, other) => Some(other),
    }
}

fn integer(n: &Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}
