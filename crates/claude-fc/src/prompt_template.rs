use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

use crate::models::tool::{Tool, ToolArgument};

const TOOL_CALLS_TEMPLATE: &str = include_str!("prompts/tool_calls.md");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

#[derive(Serialize)]
struct ToolDescription<'a> {
    name: &'a str,
    description: &'a str,
    arguments: Vec<ToolArgument>,
}

#[derive(Serialize)]
struct ToolCallsContext<'a> {
    tools: Vec<ToolDescription<'a>>,
}

/// Instructions teaching the model the function calling markup, followed by
/// a description of every tool. Nothing when there are no tools.
pub fn tool_call_prompt(tools: &[&Tool]) -> Result<Option<String>, TeraError> {
    if tools.is_empty() {
        return Ok(None);
    }

    let context = ToolCallsContext {
        tools: tools
            .iter()
            .map(|tool| ToolDescription {
                name: &tool.name,
                description: &tool.description,
                arguments: tool.arguments(),
            })
            .collect(),
    };
    load_prompt(TOOL_CALLS_TEMPLATE, &context).map(Some)
}
