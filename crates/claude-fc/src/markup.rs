//! The XML-ish function calling convention Claude is prompted to follow.
//!
//! ```text
//! <function_calls>
//! <invoke><tool_name>NAME</tool_name><parameters><P1>V1</P1>...</parameters></invoke>
//! </function_calls>
//! ```
//!
//! This is not real XML: there is no escaping, no attributes and no
//! guarantee the model closes what it opens. Extraction is therefore
//! forgiving and reports missing pieces as absent fields instead of failing.
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::errors::MarkupError;
use crate::models::message::Message;
use crate::models::tool::ToolCall;

pub const FUNCTION_CALLS_OPEN: &str = "<function_calls>";
pub const FUNCTION_CALLS_CLOSE: &str = "</function_calls>";
pub const INVOKE_OPEN: &str = "<invoke>";
pub const INVOKE_CLOSE: &str = "</invoke>";

lazy_static! {
    static ref OPEN_TAG: Regex = Regex::new(r"^<([A-Za-z_][A-Za-z0-9_.:-]*)\s*(/?)>").unwrap();
}

/// One `<invoke>` block, as far as it could be read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedInvocation {
    pub tool_name: Option<String>,
    pub parameters: Option<Map<String, Value>>,
}

impl ParsedInvocation {
    /// Serialize back into the wire format
    pub fn to_markup(&self) -> String {
        let mut markup = String::from(INVOKE_OPEN);
        if let Some(name) = &self.tool_name {
            markup.push_str("<tool_name>");
            markup.push_str(name);
            markup.push_str("</tool_name>");
        }
        if let Some(parameters) = &self.parameters {
            markup.push_str("<parameters>");
            write_elements(&mut markup, parameters);
            markup.push_str("</parameters>");
        }
        markup.push_str(INVOKE_CLOSE);
        markup
    }

    pub fn into_tool_call(self) -> Result<ToolCall, MarkupError> {
        let name = self.tool_name.ok_or(MarkupError::MissingToolName)?;
        let arguments = self
            .parameters
            .map(|parameters| serde_json::to_string(&parameters))
            .transpose()?;
        Ok(ToolCall::function(name, arguments))
    }
}

fn write_elements(markup: &mut String, elements: &Map<String, Value>) {
    for (name, value) in elements {
        markup.push('<');
        markup.push_str(name);
        markup.push('>');
        match value {
            Value::Object(nested) => write_elements(markup, nested),
            Value::String(text) => markup.push_str(text),
            other => markup.push_str(&other.to_string()),
        }
        markup.push_str("</");
        markup.push_str(name);
        markup.push('>');
    }
}

/// Read the tool name and parameters out of a fragment holding one invocation.
///
/// Parameter values are kept as trimmed text unless their content is made
/// only of well-formed child elements, in which case they become a nested
/// object. An unclosed parameter leaves `parameters` absent.
pub fn extract_invocation(fragment: &str) -> ParsedInvocation {
    let tool_name = element_text(fragment, "tool_name")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from);
    let parameters = element_text(fragment, "parameters").and_then(|block| parse_elements(block, false));

    ParsedInvocation {
        tool_name,
        parameters,
    }
}

/// Inner text of the first `<tag>` element, honouring nested tags of the same name
fn element_text<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let start = text.find(&open)? + open.len();
    let body = &text[start..];
    let end = matching_close(body, tag)?;
    Some(&body[..end])
}

/// Offset in `body` of the `</tag>` closing an element whose opening tag was just consumed
fn matching_close(body: &str, tag: &str) -> Option<usize> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut depth = 0usize;
    let mut cursor = 0;
    loop {
        let next_close = body[cursor..].find(&close)? + cursor;
        match body[cursor..next_close].find(&open) {
            Some(offset) => {
                depth += 1;
                cursor += offset + open.len();
            }
            None if depth == 0 => return Some(next_close),
            None => {
                depth -= 1;
                cursor = next_close + close.len();
            }
        }
    }
}

/// Parse a run of sibling elements.
///
/// Lenient mode skips stray text between elements; strict mode (used to decide
/// whether a value is nested markup) rejects it.
fn parse_elements(block: &str, strict: bool) -> Option<Map<String, Value>> {
    let mut elements = Map::new();
    let mut rest = block.trim_start();

    while !rest.is_empty() {
        match rest.find('<') {
            Some(0) => {}
            Some(_) if strict => return None,
            Some(offset) => rest = &rest[offset..],
            None if strict => return None,
            None => break,
        }

        let captures = OPEN_TAG.captures(rest)?;
        let name = captures.get(1)?.as_str();
        let after_open = captures.get(0)?.end();

        if !captures[2].is_empty() {
            elements.insert(name.to_string(), Value::String(String::new()));
            rest = rest[after_open..].trim_start();
            continue;
        }

        let body = &rest[after_open..];
        let end = matching_close(body, name)?;
        elements.insert(name.to_string(), element_value(&body[..end]));
        rest = body[end + name.len() + 3..].trim_start();
    }

    Some(elements)
}

fn element_value(inner: &str) -> Value {
    let trimmed = inner.trim();
    if trimmed.starts_with('<') {
        if let Some(nested) = parse_elements(trimmed, true).filter(|nested| !nested.is_empty()) {
            return Value::Object(nested);
        }
    }
    Value::String(trimmed.to_string())
}

/// Tool calls in a complete response.
///
/// Generation stops on `</function_calls>`, so the last invocation may have
/// no closing `</invoke>`; every fragment holding an `<invoke>` is tried.
pub fn tool_calls_from_response(content: &str) -> Vec<ToolCall> {
    collect_tool_calls(
        content
            .split(INVOKE_CLOSE)
            .filter(|fragment| fragment.contains(INVOKE_OPEN)),
    )
}

/// Tool calls in text accumulated from a stream.
///
/// Only fragments with a complete `<invoke>...</invoke>` pair are used.
pub fn tool_calls_from_stream(content: &str) -> Vec<ToolCall> {
    let pieces: Vec<&str> = content.split(INVOKE_CLOSE).collect();
    let last = pieces.len().saturating_sub(1);
    let fragments = pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| {
            if i < last {
                format!("{piece}{INVOKE_CLOSE}")
            } else {
                piece.to_string()
            }
        })
        .filter(|fragment| fragment.contains(INVOKE_OPEN) && fragment.contains(INVOKE_CLOSE));
    collect_tool_calls(fragments)
}

fn collect_tool_calls<I, S>(fragments: I) -> Vec<ToolCall>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tool_calls = Vec::new();
    for fragment in fragments {
        let fragment = fragment.as_ref();
        match extract_invocation(fragment).into_tool_call() {
            Ok(tool_call) => tool_calls.push(tool_call),
            Err(e) => tracing::warn!("Dropping tool call ({}): {}", e, fragment),
        }
    }
    if !tool_calls.is_empty() {
        tracing::debug!("Tool calls: {:?}", tool_calls);
    }
    tool_calls
}

/// Strip every `<function_calls>...</function_calls>` region, keeping the prose around it
pub fn remove_function_calls(text: &str) -> String {
    let mut remaining = text.to_string();
    while let Some(start) = remaining.find(FUNCTION_CALLS_OPEN) {
        let Some(offset) = remaining[start..].find(FUNCTION_CALLS_CLOSE) else {
            break;
        };
        let end = start + offset + FUNCTION_CALLS_CLOSE.len();
        remaining.replace_range(start..end, "");
    }
    remaining
}

/// Aggregate result messages into the envelope sent back as one user message
pub fn function_results(results: &[Message]) -> Option<String> {
    if results.is_empty() {
        return None;
    }

    let mut envelope = String::from("<function_results>");
    for result in results {
        envelope.push_str("<result>");
        envelope.push_str("<tool_name>");
        envelope.push_str(result.tool_call_name.as_deref().unwrap_or_default());
        envelope.push_str("</tool_name>");
        envelope.push_str("<stdout>");
        envelope.push_str(result.content.as_deref().unwrap_or_default());
        envelope.push_str("</stdout>");
        envelope.push_str("</result>");
    }
    envelope.push_str("</function_results>");
    Some(envelope)
}
