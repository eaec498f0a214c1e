//! Tool definition schema and its per-provider renderings

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Declared shape of a tool: name, description and JSON Schema parameters.
///
/// Every provider rendering below is derived from the same value, so two
/// dialects never see different schemas for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// `{type: function, function: {name, description, parameters}}`
    pub fn to_openai(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }

    /// `{name, description, input_schema}`
    pub fn to_anthropic(&self) -> Value {
        let mut tool = serde_json::Map::new();
        tool.insert("name".to_string(), json!(self.name));
        if !self.description.is_empty() {
            tool.insert("description".to_string(), json!(self.description));
        }
        tool.insert("input_schema".to_string(), self.parameters.clone());
        Value::Object(tool)
    }

    /// Entry of a Gemini `function_declarations` list.
    pub fn to_gemini(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}
