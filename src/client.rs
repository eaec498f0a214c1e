//! Client and configuration
//!
//! [`LlmClient`] is the caller-facing surface: it owns the tool registry,
//! the dispatch engine and the orchestrator built from one [`LlmConfig`].
//!
//! ```rust,ignore
//! use bhumi::prelude::*;
//!
//! let client = LlmClient::new(LlmConfig::from_env("openai/gpt-4o-mini")?)?;
//! client.register_fn(
//!     "get_weather",
//!     |args| Ok(serde_json::json!({"forecast": "sunny", "location": args["location"]})),
//!     "Current weather for a location",
//!     serde_json::json!({"type": "object", "properties": {"location": {"type": "string"}}}),
//! );
//! let result = client.completion(CompletionRequest::from_input("Weather in Paris?")).await?;
//! println!("{}", result.text);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::buffer::{BufferConfig, BufferDecision};
use crate::engine::{DispatchEngine, EngineOptions, HttpEngine};
use crate::error::LlmError;
use crate::orchestrator::{Orchestrator, OrchestratorOptions, TextStream};
use crate::provider::{ModelId, ProviderKind};
use crate::retry::RetryPolicy;
use crate::structured_output::{StructuredOutput, extract_json, validate};
use crate::tools::{SharedToolRegistry, ToolDefinition, ToolHandler};
use crate::transformers::RequestBuilder;
use crate::types::{CompletionRequest, CompletionResult, RequestInput};

fn empty_key() -> SecretString {
    SecretString::from(String::new())
}

fn deserialize_key<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

const fn default_poll_interval_ms() -> u64 {
    10
}

const fn default_max_concurrent() -> usize {
    10
}

const fn default_max_retries() -> u32 {
    3
}

/// Client configuration.
///
/// The API key is never serialized and never printed by `Debug`.
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(skip_serializing, default = "empty_key", deserialize_with = "deserialize_key")]
    pub api_key: SecretString,
    /// `provider/model-name` composite.
    pub model: String,
    /// Explicit dialect; derived from `model` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    /// API base. Defaults per provider tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Per-round timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Cap on tool-calling rounds. Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<usize>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Retries per HTTP request after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Gemini search grounding.
    #[serde(default)]
    pub grounding: bool,
    /// Fields merged verbatim into every wire body.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    /// Extra HTTP headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use secrecy::ExposeSecret;
        f.debug_struct("LlmConfig")
            .field("api_key_present", &!self.api_key.expose_secret().is_empty())
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_rounds", &self.max_rounds)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_concurrent", &self.max_concurrent)
            .field("max_retries", &self.max_retries)
            .field("debug", &self.debug)
            .field("buffer", &self.buffer)
            .field("grounding", &self.grounding)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            model: model.into(),
            provider: None,
            base_url: None,
            max_tokens: None,
            timeout_ms: None,
            max_rounds: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            debug: false,
            buffer: BufferConfig::default(),
            grounding: false,
            extra: Map::new(),
            headers: BTreeMap::new(),
        }
    }

    /// Read the key from the provider's conventional variable, e.g.
    /// `GROQ_API_KEY` for `groq/llama-3.1-8b-instant`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, LlmError> {
        let model = model.into();
        let var = ModelId::parse(&model).env_var();
        let key = std::env::var(&var)
            .map_err(|_| LlmError::ConfigurationError(format!("{var} is not set")))?;
        Ok(Self::new(key, model))
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub const fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = Some(max_rounds);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub const fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }

    pub const fn with_grounding(mut self, grounding: bool) -> Self {
        self.grounding = grounding;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn model_id(&self) -> ModelId {
        ModelId::parse(&self.model)
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.unwrap_or_else(|| self.model_id().kind)
    }

    /// Configured base URL, or the provider tag's default.
    pub fn resolved_base_url(&self) -> Result<String, LlmError> {
        if let Some(url) = &self.base_url {
            return Ok(url.clone());
        }
        let id = self.model_id();
        id.default_base_url().map(str::to_string).ok_or_else(|| {
            LlmError::ConfigurationError(format!(
                "no default base URL for provider '{}'; set base_url",
                id.provider_tag
            ))
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        if self.model.trim().is_empty() {
            return Err(LlmError::ConfigurationError("model must not be empty".to_string()));
        }
        if self.max_concurrent == 0 {
            return Err(LlmError::ConfigurationError(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(LlmError::ConfigurationError(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn engine_options(&self) -> Result<EngineOptions, LlmError> {
        Ok(EngineOptions::new(
            self.provider_kind(),
            self.model_id().name,
            self.resolved_base_url()?,
        )
        .with_max_concurrent(self.max_concurrent)
        .with_debug(self.debug)
        .with_retry(RetryPolicy::default().with_max_retries(self.max_retries))
        .with_timeout(self.timeout()))
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions::default()
            .with_max_rounds(self.max_rounds)
            .with_timeout(self.timeout())
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
    }

    pub fn request_builder(&self) -> RequestBuilder {
        RequestBuilder::new(self.api_key.clone())
            .with_headers(self.headers.clone())
            .with_extra(self.extra.clone())
            .with_grounding(self.grounding)
    }
}

/// Multi-provider completion client with automatic function calling.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: LlmConfig,
    tools: SharedToolRegistry,
    orchestrator: Orchestrator,
}

impl LlmClient {
    /// Client backed by an [`HttpEngine`]. Must be called inside a tokio
    /// runtime.
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        config.validate()?;
        let engine = HttpEngine::new(config.engine_options()?)?;
        Self::with_engine(config, Arc::new(engine))
    }

    /// Client backed by a caller-supplied engine.
    pub fn with_engine(config: LlmConfig, engine: Arc<dyn DispatchEngine>) -> Result<Self, LlmError> {
        config.validate()?;
        let buffer = config.buffer.build(config.max_concurrent)?;
        let tools = SharedToolRegistry::default();
        let orchestrator = Orchestrator::new(
            engine,
            config.request_builder(),
            tools.clone(),
            buffer,
            config.orchestrator_options(),
        );
        tracing::debug!(
            model = %config.model,
            provider = %config.provider_kind(),
            buffer = ?orchestrator.buffer_decision(),
            "client ready"
        );
        Ok(Self {
            config,
            tools,
            orchestrator,
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    pub fn tools(&self) -> &SharedToolRegistry {
        &self.tools
    }

    pub fn buffer_decision(&self) -> BufferDecision {
        self.orchestrator.buffer_decision()
    }

    /// Register a tool. Conversations already in flight see it from their
    /// next round on.
    pub fn register_tool(
        &self,
        name: impl Into<String>,
        handler: impl ToolHandler + 'static,
        description: impl Into<String>,
        json_schema: Value,
    ) -> Option<ToolDefinition> {
        self.tools
            .update(|registry| registry.register(name, handler, description, json_schema))
    }

    /// Register a synchronous closure as a tool.
    pub fn register_fn<F>(
        &self,
        name: impl Into<String>,
        handler: F,
        description: impl Into<String>,
        json_schema: Value,
    ) -> Option<ToolDefinition>
    where
        F: Fn(Value) -> Result<Value, LlmError> + Send + Sync + 'static,
    {
        self.tools
            .update(|registry| registry.register_fn(name, handler, description, json_schema))
    }

    /// Register an async closure as a tool.
    pub fn register_async<F, Fut>(
        &self,
        name: impl Into<String>,
        handler: F,
        description: impl Into<String>,
        json_schema: Value,
    ) -> Option<ToolDefinition>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, LlmError>> + Send + 'static,
    {
        self.tools
            .update(|registry| registry.register_async(name, handler, description, json_schema))
    }

    pub fn unregister_tool(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.update(|registry| registry.unregister(name))
    }

    /// Run a completion, executing tool calls until the model answers.
    pub async fn completion(&self, request: CompletionRequest) -> Result<CompletionResult, LlmError> {
        self.orchestrator.complete(self.apply_defaults(request)).await
    }

    /// Stream a completion's answer text.
    pub fn stream(&self, request: CompletionRequest) -> TextStream {
        self.orchestrator.stream(self.apply_defaults(request))
    }

    /// Run a completion and parse its answer as `T`.
    ///
    /// OpenAI-compatible providers also receive a `response_format`
    /// json_schema hint. Missing JSON fails with
    /// [`LlmError::ExtractionError`], a schema mismatch with
    /// [`LlmError::SchemaValidation`].
    pub async fn parse<T: StructuredOutput>(&self, request: CompletionRequest) -> Result<T, LlmError> {
        let request = self.apply_defaults(request);
        let schema = T::json_schema();
        let instruction = format!(
            "Respond only with a JSON value matching this JSON Schema:\n{schema}"
        );
        let mut request = append_instructions(request, &instruction);
        if matches!(
            request.resolved_provider(),
            ProviderKind::OpenAi | ProviderKind::Generic
        ) && !request.extra.contains_key("response_format")
        {
            request.extra.insert(
                "response_format".to_string(),
                json!({
                    "type": "json_schema",
                    "json_schema": {"name": T::schema_name(), "schema": schema}
                }),
            );
        }

        let result = self.orchestrator.complete(request).await?;
        validate(extract_json(&result.text)?)
    }

    fn apply_defaults(&self, mut request: CompletionRequest) -> CompletionRequest {
        if request.model.trim().is_empty() {
            request.model = self.config.model.clone();
        }
        if request.provider.is_none() {
            request.provider = self.config.provider;
        }
        if request.max_tokens.is_none() {
            request.max_tokens = self.config.max_tokens;
        }
        request
    }
}

/// Add instructions without discarding ones already present.
fn append_instructions(request: CompletionRequest, text: &str) -> CompletionRequest {
    let existing = match &request.input {
        RequestInput::Prompt {
            instructions: Some(existing),
            ..
        } if !existing.is_empty() => Some(existing.clone()),
        _ => None,
    };
    match existing {
        Some(existing) => request.with_instructions(format!("{existing}\n\n{text}")),
        None => request.with_instructions(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptedEngine;

    #[test]
    fn config_defaults_and_base_urls() {
        let config = LlmConfig::new("k", "groq/llama-3.1-8b-instant");
        assert_eq!(config.provider_kind(), ProviderKind::OpenAi);
        assert_eq!(
            config.resolved_base_url().unwrap(),
            "https://api.groq.com/openai/v1"
        );
        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.max_concurrent, 10);

        let unknown = LlmConfig::new("k", "ollama/llama3");
        assert_eq!(unknown.provider_kind(), ProviderKind::Generic);
        assert!(matches!(
            unknown.resolved_base_url(),
            Err(LlmError::ConfigurationError(_))
        ));
    }

    #[test]
    fn config_deserializes_without_key_and_never_serializes_it() {
        let config: LlmConfig = serde_json::from_value(json!({
            "model": "anthropic/claude-3-5-sonnet",
            "max_rounds": 4,
            "buffer": {"strategy": "fixed", "size": 2048}
        }))
        .unwrap();
        assert_eq!(config.max_rounds, Some(4));
        assert_eq!(config.buffer, BufferConfig::Fixed { size: 2048 });

        let secret = LlmConfig::new("sk-very-secret", "openai/gpt-4o");
        let text = serde_json::to_string(&secret).unwrap();
        assert!(!text.contains("sk-very-secret"));
        assert!(!format!("{secret:?}").contains("sk-very-secret"));
    }

    #[test]
    fn instructions_are_appended() {
        let request = CompletionRequest::from_input("hi").with_instructions("be brief");
        let request = append_instructions(request, "json only");
        match request.input {
            RequestInput::Prompt { instructions, .. } => {
                assert_eq!(instructions.as_deref(), Some("be brief\n\njson only"))
            }
            other => panic!("unexpected input: {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_inherits_config_defaults() {
        let engine = Arc::new(ScriptedEngine::new().with_response(
            json!({"content": [{"type": "text", "text": "hello"}], "type": "message", "stop_reason": "end_turn"})
                .to_string(),
        ));
        let config = LlmConfig::new("k", "anthropic/claude-3-5-haiku").with_max_tokens(256);
        let client = LlmClient::with_engine(config, engine.clone()).unwrap();

        let result = client
            .completion(CompletionRequest::from_input("hi"))
            .await
            .unwrap();
        assert_eq!(result.text, "hello");

        let body = engine.last_body().unwrap();
        assert_eq!(body["model"], "claude-3-5-haiku");
        assert_eq!(body["max_tokens"], 256);
    }
}
