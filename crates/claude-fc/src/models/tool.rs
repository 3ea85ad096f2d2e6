use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// A json schema of the function signature
    pub input_schema: Value,
}

/// One argument of a tool, as described to the model in the system prompt
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolArgument {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Introspect the schema's `properties`, in declaration order.
    ///
    /// A property whose `type` is a list of types reports the first entry;
    /// a property without a type is reported as `string`.
    pub fn arguments(&self) -> Vec<ToolArgument> {
        let required = self.required();
        let Some(properties) = self.input_schema.get("properties").and_then(Value::as_object)
        else {
            return Vec::new();
        };

        properties
            .iter()
            .map(|(name, schema)| ToolArgument {
                name: name.clone(),
                kind: schema_type(schema).unwrap_or("string").to_string(),
                required: required.contains(&name.as_str()),
            })
            .collect()
    }

    /// Declared type of a single argument, if the schema names one
    pub fn argument_type(&self, name: &str) -> Option<&str> {
        self.input_schema
            .get("properties")
            .and_then(|p| p.get(name))
            .and_then(schema_type)
    }

    pub fn has_argument(&self, name: &str) -> bool {
        self.input_schema
            .get("properties")
            .and_then(|p| p.get(name))
            .is_some()
    }

    /// Names listed in the schema's `required` array
    pub fn required(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

fn schema_type(schema: &Value) -> Option<&str> {
    match schema.get("type")? {
        Value::String(kind) => Some(kind),
        Value::Array(kinds) => kinds.first().and_then(Value::as_str),
        _ => None,
    }
}

/// The function half of a tool call: a name plus JSON-encoded arguments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// A tool call the model asked for, recovered from its markup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDef,
}

impl ToolCall {
    pub fn function<S: Into<String>>(name: S, arguments: Option<String>) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDef {
                name: name.into(),
                arguments,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}
