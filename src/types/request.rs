//! Completion request types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ChatMessage, ToolSpec};
use crate::error::LlmError;
use crate::provider::{ModelId, ProviderKind};

/// The two accepted request shapes. Exactly one is carried per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestInput {
    /// Full conversation history.
    Messages(Vec<ChatMessage>),
    /// Single prompt with optional system instructions.
    Prompt {
        input: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instructions: Option<String>,
    },
}

impl RequestInput {
    /// Resolve loosely-supplied fields into one shape. When both a message
    /// list and `input` are given, `input` (with `instructions`) wins.
    pub fn resolve(
        messages: Option<Vec<ChatMessage>>,
        input: Option<String>,
        instructions: Option<String>,
    ) -> Result<Self, LlmError> {
        match (messages, input) {
            (messages, Some(input)) => {
                if messages.is_some() {
                    tracing::debug!("both messages and input supplied; input takes precedence");
                }
                Ok(Self::Prompt {
                    input,
                    instructions,
                })
            }
            (Some(messages), None) => Ok(Self::Messages(messages)),
            (None, None) => Err(LlmError::EmptyRequest(
                "request needs either messages or input".to_string(),
            )),
        }
    }

    /// Lower to a message list, failing on an empty conversation.
    pub fn to_messages(&self) -> Result<Vec<ChatMessage>, LlmError> {
        match self {
            Self::Messages(messages) if messages.is_empty() => Err(LlmError::EmptyRequest(
                "message list must not be empty".to_string(),
            )),
            Self::Messages(messages) => Ok(messages.clone()),
            Self::Prompt { input, .. } if input.trim().is_empty() => Err(
                LlmError::EmptyRequest("input must not be empty".to_string()),
            ),
            Self::Prompt {
                input,
                instructions,
            } => {
                let mut out = Vec::with_capacity(2);
                if let Some(instructions) = instructions.as_ref().filter(|s| !s.is_empty()) {
                    out.push(ChatMessage::system(instructions.as_str()));
                }
                out.push(ChatMessage::user(input.as_str()));
                Ok(out)
            }
        }
    }
}

/// Canonical completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub input: RequestInput,
    /// Model name, optionally as a `provider/model-name` composite.
    pub model: String,
    /// Explicit provider; derived from `model` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub stream: bool,
    /// Tool schemas declared on this request in addition to the registry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Provider-specific fields merged verbatim into the wire body.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self::from_shape(RequestInput::Messages(messages))
    }

    /// Single-prompt form.
    pub fn from_input(input: impl Into<String>) -> Self {
        Self::from_shape(RequestInput::Prompt {
            input: input.into(),
            instructions: None,
        })
    }

    fn from_shape(input: RequestInput) -> Self {
        Self {
            input,
            model: String::new(),
            provider: None,
            stream: false,
            tools: Vec::new(),
            max_tokens: None,
            extra: Map::new(),
        }
    }

    /// Attach system instructions. On a message-list request they become a
    /// leading system message.
    pub fn with_instructions(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.input = match self.input {
            RequestInput::Prompt { input, .. } => RequestInput::Prompt {
                input,
                instructions: Some(text),
            },
            RequestInput::Messages(mut messages) => {
                messages.insert(0, ChatMessage::system(text));
                RequestInput::Messages(messages)
            }
        };
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub const fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Parsed model composite.
    pub fn model_id(&self) -> ModelId {
        ModelId::parse(&self.model)
    }

    /// Explicit provider, or the one derived from the model composite.
    pub fn resolved_provider(&self) -> ProviderKind {
        self.provider.unwrap_or_else(|| self.model_id().kind)
    }

    /// Model name without the provider prefix.
    pub fn model_name(&self) -> String {
        self.model_id().name
    }
}
