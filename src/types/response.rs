//! Tool call and completion result types

use serde::{Deserialize, Serialize};

/// Function name plus raw JSON argument text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw argument text; parsed as JSON only when the tool is executed.
    pub arguments: String,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub r#type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            r#type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Build a call from already-structured arguments (Anthropic `input`,
    /// Gemini `args`).
    pub fn from_value(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: &serde_json::Value,
    ) -> Self {
        let args = if arguments.is_null() {
            "{}".to_string()
        } else {
            arguments.to_string()
        };
        Self::function(id, name, args)
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parse the argument text. Empty text is treated as `{}`.
    pub fn parsed_arguments(&self) -> Result<serde_json::Value, crate::error::LlmError> {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_str(raw).map_err(|e| crate::error::LlmError::InvalidToolArguments {
            name: self.function.name.clone(),
            reason: e.to_string(),
        })
    }
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    /// Map a provider finish/stop reason string.
    pub fn parse(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "STOP" | "stop_sequence" => Self::Stop,
            "length" | "max_tokens" | "MAX_TOKENS" => Self::Length,
            "tool_calls" | "tool_use" | "function_call" => Self::ToolCalls,
            "content_filter" | "SAFETY" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Terminal result of a completion. Created once per terminal round and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub text: String,
    /// Content of a `<think>` block or provider reasoning field, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Provider response as received (a JSON string value when it was not JSON).
    pub raw: serde_json::Value,
}

impl CompletionResult {
    pub(crate) fn new(text: String, reasoning: Option<String>, raw: serde_json::Value) -> Self {
        Self {
            text,
            reasoning,
            raw,
        }
    }
}
