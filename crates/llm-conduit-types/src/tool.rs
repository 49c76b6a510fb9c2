use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Tool definition sent to the provider (serializable subset, no handler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-Schema-like object, treated as opaque apart from argument validation.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Checks the name against `[a-zA-Z][a-zA-Z0-9_]{0,63}` and that the
    /// parameter schema is an object schema.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() || self.name.len() > 64 {
            return Err(Error::configuration(format!(
                "Tool name '{}' must be 1-64 characters",
                self.name
            )));
        }
        let valid = self.name.chars().enumerate().all(|(i, c)| {
            if i == 0 {
                c.is_ascii_alphabetic()
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            }
        });
        if !valid {
            return Err(Error::configuration(format!(
                "Tool name '{}' must match [a-zA-Z][a-zA-Z0-9_]{{0,63}}",
                self.name
            )));
        }

        match self.parameters.as_object() {
            Some(obj) if obj.get("type").and_then(|v| v.as_str()) == Some("object") => Ok(()),
            Some(_) => Err(Error::configuration(
                "Tool parameters must have \"type\": \"object\" at root",
            )),
            None => Err(Error::configuration("Tool parameters must be a JSON object")),
        }
    }
}

/// Tool call arguments as they arrived: accumulated JSON text or an already
/// structured mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArguments {
    Structured(Map<String, Value>),
    Raw(String),
}

impl Default for ToolArguments {
    fn default() -> Self {
        Self::Structured(Map::new())
    }
}

impl From<Map<String, Value>> for ToolArguments {
    fn from(map: Map<String, Value>) -> Self {
        Self::Structured(map)
    }
}

impl From<String> for ToolArguments {
    fn from(raw: String) -> Self {
        Self::Raw(raw)
    }
}

/// A model request to invoke a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(rename = "arguments")]
    pub raw_arguments: ToolArguments,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_summary: Option<String>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<ToolArguments>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments: arguments.into(),
            ..Default::default()
        }
    }

    /// Parsed arguments. Blank raw text is an empty mapping; anything that is
    /// not a JSON object is an error.
    pub fn try_arguments(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match &self.raw_arguments {
            ToolArguments::Structured(map) => Ok(map.clone()),
            ToolArguments::Raw(raw) if raw.trim().is_empty() => Ok(Map::new()),
            ToolArguments::Raw(raw) => serde_json::from_str(raw),
        }
    }

    /// Parsed arguments, falling back to an empty mapping when the raw text
    /// does not hold a JSON object.
    pub fn arguments(&self) -> Map<String, Value> {
        self.try_arguments().unwrap_or_default()
    }

    /// Arguments as JSON text, for echoing the call back to the provider.
    pub fn arguments_json(&self) -> String {
        match &self.raw_arguments {
            ToolArguments::Raw(raw) if !raw.trim().is_empty() => raw.clone(),
            _ => Value::Object(self.arguments()).to_string(),
        }
    }
}

/// Outcome of executing one tool call. One-to-one with a `ToolCall` by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Map<String, Value>,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_result_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Value>,
    /// Set when a failure handler produced `result` in place of an error.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call: &ToolCall, args: Map<String, Value>, result: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            args,
            result: result.into(),
            tool_call_result_id: call.result_id.clone(),
            artifacts: Vec::new(),
            is_error: false,
        }
    }
}
