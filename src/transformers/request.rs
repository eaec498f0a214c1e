//! Request building
//!
//! Turns a canonical [`CompletionRequest`] plus the tool registry into the
//! wire request of the resolved provider dialect. The result is handed to the
//! dispatch engine as a single JSON document: the provider body with the HTTP
//! headers, endpoint path and a per-submission request id embedded under
//! reserved keys.

use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};

use crate::error::LlmError;
use crate::provider::ProviderKind;
use crate::standards::{anthropic::AnthropicStandard, gemini::GeminiStandard, openai::OpenAiStandard};
use crate::tools::ToolRegistry;
use crate::types::{ChatMessage, CompletionRequest, ToolSpec, validate_tool_references};

/// Reserved payload key carrying HTTP headers.
pub const HEADERS_KEY: &str = "_headers";
/// Reserved payload key carrying the endpoint path relative to the base URL.
pub const ENDPOINT_KEY: &str = "_endpoint";
/// Reserved payload key carrying the id engines key their output by.
pub const REQUEST_ID_KEY: &str = "_request_id";

/// Fresh id for one engine submission.
pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}

/// Everything a dialect needs to render one chat body.
#[derive(Debug, Clone, Copy)]
pub struct ChatContext<'a> {
    /// Model name with any `provider/` prefix removed.
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolSpec],
    pub stream: bool,
    pub max_tokens: Option<u32>,
    /// Gemini only: add the `google_search` grounding tool.
    pub grounding: bool,
}

/// Transform canonical chat input into a provider-specific request.
pub trait RequestTransformer: Send + Sync {
    /// Provider identifier (e.g. "openai", "anthropic", "gemini")
    fn provider_id(&self) -> &'static str;

    /// Endpoint path relative to the provider base URL.
    fn endpoint(&self, model: &str, stream: bool) -> String;

    /// Authentication headers for the given key.
    fn auth_headers(&self, api_key: &str) -> Vec<(String, String)>;

    /// Render the JSON body.
    fn transform_chat(&self, ctx: &ChatContext<'_>) -> Result<Value, LlmError>;
}

/// Request transformer for a provider kind. `Generic` speaks the
/// OpenAI-compatible dialect.
pub fn request_transformer(kind: ProviderKind) -> &'static dyn RequestTransformer {
    match kind {
        ProviderKind::OpenAi | ProviderKind::Generic => &OpenAiStandard,
        ProviderKind::Anthropic => &AnthropicStandard,
        ProviderKind::Gemini => &GeminiStandard,
    }
}

/// A fully rendered provider request.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    /// Identifies this submission's output on the engine side.
    pub request_id: String,
    pub endpoint: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl WireRequest {
    /// Embed headers, endpoint and request id into the body under the
    /// reserved keys.
    pub fn into_engine_payload(self) -> Value {
        let mut body = match self.body {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("body".to_string(), other);
                map
            }
        };
        let headers: Map<String, Value> = self
            .headers
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        body.insert(HEADERS_KEY.to_string(), Value::Object(headers));
        body.insert(ENDPOINT_KEY.to_string(), Value::String(self.endpoint));
        body.insert(REQUEST_ID_KEY.to_string(), Value::String(self.request_id));
        Value::Object(body)
    }

    /// Serialized engine payload.
    pub fn to_engine_string(&self) -> String {
        self.clone().into_engine_payload().to_string()
    }

    /// Inverse of [`WireRequest::into_engine_payload`]: strip the reserved
    /// keys back out of a submitted payload. A payload without a request id
    /// gets a fresh one.
    pub fn from_engine_payload(payload: &str) -> Result<Self, LlmError> {
        let value: Value = serde_json::from_str(payload)?;
        let Value::Object(mut body) = value else {
            return Err(LlmError::InvalidParameter(
                "engine payload must be a JSON object".to_string(),
            ));
        };

        let headers = match body.remove(HEADERS_KEY) {
            Some(Value::Object(map)) => map
                .into_iter()
                .filter_map(|(k, v)| match v {
                    Value::String(s) => Some((k, s)),
                    _ => None,
                })
                .collect(),
            _ => BTreeMap::new(),
        };
        let endpoint = match body.remove(ENDPOINT_KEY) {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };
        let request_id = match body.remove(REQUEST_ID_KEY) {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => new_request_id(),
        };

        Ok(Self {
            request_id,
            endpoint,
            headers,
            body: Value::Object(body),
        })
    }

    /// Whether the body asks for a streamed response.
    pub fn is_stream(&self) -> bool {
        self.body.get("stream").and_then(Value::as_bool) == Some(true)
            || self.endpoint.contains("streamGenerateContent")
    }
}

/// Builds wire requests for one client.
#[derive(Clone)]
pub struct RequestBuilder {
    api_key: SecretString,
    headers: BTreeMap<String, String>,
    extra: Map<String, Value>,
    grounding: bool,
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("extra", &self.extra)
            .field("grounding", &self.grounding)
            .finish_non_exhaustive()
    }
}

impl RequestBuilder {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            headers: BTreeMap::new(),
            extra: Map::new(),
            grounding: false,
        }
    }

    /// Add an HTTP header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Body fields merged into every request. Per-request `extra` wins.
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    pub const fn with_grounding(mut self, grounding: bool) -> Self {
        self.grounding = grounding;
        self
    }

    /// Build the first-round request.
    pub fn build(
        &self,
        request: &CompletionRequest,
        registry: &ToolRegistry,
    ) -> Result<WireRequest, LlmError> {
        let messages = request.input.to_messages()?;
        self.build_with_messages(request, &messages, registry)
    }

    /// Build a request for an explicit conversation (later tool rounds).
    pub fn build_with_messages(
        &self,
        request: &CompletionRequest,
        messages: &[ChatMessage],
        registry: &ToolRegistry,
    ) -> Result<WireRequest, LlmError> {
        if messages.is_empty() {
            return Err(LlmError::EmptyRequest(
                "message list must not be empty".to_string(),
            ));
        }
        validate_tool_references(messages)?;

        let provider = request.resolved_provider();
        let transformer = request_transformer(provider);
        let model = request.model_name();
        let tools = merge_tools(&request.tools, registry);

        let ctx = ChatContext {
            model: &model,
            messages,
            tools: &tools,
            stream: request.stream,
            max_tokens: request.max_tokens,
            grounding: self.grounding,
        };
        let mut body = transformer.transform_chat(&ctx)?;
        if let Value::Object(map) = &mut body {
            for (k, v) in self.extra.iter().chain(request.extra.iter()) {
                map.insert(k.clone(), v.clone());
            }
        }

        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.extend(transformer.auth_headers(self.api_key.expose_secret()));
        headers.extend(self.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        tracing::debug!(
            provider = transformer.provider_id(),
            model = %model,
            messages = messages.len(),
            tools = tools.len(),
            stream = request.stream,
            "built wire request"
        );

        Ok(WireRequest {
            request_id: new_request_id(),
            endpoint: transformer.endpoint(&model, request.stream),
            headers,
            body,
        })
    }
}

/// Request-declared tools plus registry tools. A registry entry replaces a
/// request declaration of the same name.
fn merge_tools(declared: &[ToolSpec], registry: &ToolRegistry) -> Vec<ToolSpec> {
    let mut merged: Vec<ToolSpec> = declared
        .iter()
        .filter(|spec| !registry.contains(&spec.name))
        .cloned()
        .collect();
    merged.extend(registry.specs());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn builder() -> RequestBuilder {
        RequestBuilder::new(SecretString::from("sk-test".to_string()))
    }

    fn weather_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_fn(
            "get_weather",
            |_| Ok(json!("sunny")),
            "Get the weather",
            json!({"type": "object", "properties": {"location": {"type": "string"}}}),
        );
        registry
    }

    #[test]
    fn openai_request_has_bearer_auth_and_tools() {
        let req = CompletionRequest::new(vec![ChatMessage::user("weather?")])
            .with_model("openai/gpt-4o-mini");
        let wire = builder().build(&req, &weather_registry()).unwrap();

        assert_eq!(wire.endpoint, "chat/completions");
        assert_eq!(wire.headers["Authorization"], "Bearer sk-test");
        assert_eq!(wire.body["model"], "gpt-4o-mini");
        assert_eq!(wire.body["stream"], false);
        assert_eq!(wire.body["tools"][0]["function"]["name"], "get_weather");
        assert!(wire.body.get("max_tokens").is_none());
    }

    #[test]
    fn unknown_provider_falls_back_to_openai_dialect() {
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")])
            .with_model("mystery/some-model");
        let wire = builder().build(&req, &ToolRegistry::new()).unwrap();
        assert_eq!(wire.endpoint, "chat/completions");
        assert_eq!(wire.body["model"], "some-model");
        assert!(wire.body.get("tools").is_none());
    }

    #[test]
    fn registry_tool_replaces_declared_tool_of_same_name() {
        let declared = ToolSpec::new("get_weather", "stale", json!({}));
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")])
            .with_model("openai/gpt-4o")
            .with_tools(vec![declared]);
        let wire = builder().build(&req, &weather_registry()).unwrap();
        let tools = wire.body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["function"]["description"], "Get the weather");
    }

    #[test]
    fn extra_fields_are_merged_with_request_precedence() {
        let mut extra = Map::new();
        extra.insert("temperature".to_string(), json!(0.2));
        extra.insert("top_p".to_string(), json!(0.9));
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")])
            .with_model("groq/llama-3.1-8b-instant")
            .with_extra("temperature", json!(0.7));
        let wire = builder()
            .with_extra(extra)
            .build(&req, &ToolRegistry::new())
            .unwrap();
        assert_eq!(wire.body["temperature"], json!(0.7));
        assert_eq!(wire.body["top_p"], json!(0.9));
    }

    #[test]
    fn engine_payload_round_trips_reserved_keys() {
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")])
            .with_model("anthropic/claude-3-5-haiku")
            .with_streaming(true);
        let wire = builder()
            .with_header("X-Trace", "abc")
            .build(&req, &ToolRegistry::new())
            .unwrap();

        let payload = wire.to_engine_string();
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value[HEADERS_KEY]["x-api-key"], "sk-test");
        assert_eq!(value[ENDPOINT_KEY], "messages");
        assert_eq!(value[REQUEST_ID_KEY], wire.request_id.as_str());

        let parsed = WireRequest::from_engine_payload(&payload).unwrap();
        assert_eq!(parsed, wire);
        assert!(parsed.is_stream());
        assert_eq!(parsed.headers["X-Trace"], "abc");
    }

    #[test]
    fn every_build_gets_its_own_request_id() {
        let req = CompletionRequest::from_input("hi").with_model("openai/gpt-4o");
        let first = builder().build(&req, &ToolRegistry::new()).unwrap();
        let second = builder().build(&req, &ToolRegistry::new()).unwrap();
        assert!(first.request_id.starts_with("req_"));
        assert_ne!(first.request_id, second.request_id);
    }

    #[test]
    fn orphan_tool_message_is_rejected() {
        let req = CompletionRequest::new(vec![
            ChatMessage::user("weather?"),
            ChatMessage::tool("sunny", "call_missing", "get_weather"),
        ])
        .with_model("openai/gpt-4o");
        let err = builder().build(&req, &weather_registry()).unwrap_err();
        assert!(matches!(err, LlmError::InvalidParameter(msg) if msg.contains("call_missing")));
    }

    #[test]
    fn answered_tool_call_is_accepted() {
        let call = crate::types::ToolCall::function("call_1", "get_weather", "{}");
        let req = CompletionRequest::new(vec![
            ChatMessage::user("weather?"),
            ChatMessage::assistant("").with_tool_calls(vec![call]),
            ChatMessage::tool("sunny", "call_1", "get_weather"),
        ])
        .with_model("openai/gpt-4o");
        let wire = builder().build(&req, &weather_registry()).unwrap();
        assert_eq!(wire.body["messages"][2]["tool_call_id"], "call_1");
    }

    #[test]
    fn empty_conversation_is_rejected() {
        let req = CompletionRequest::new(vec![]).with_model("openai/gpt-4o");
        assert!(matches!(
            builder().build(&req, &ToolRegistry::new()),
            Err(LlmError::EmptyRequest(_))
        ));
    }
}
