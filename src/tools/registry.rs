//! Tool registry
//!
//! Holds callable tools keyed by name. Registration is idempotent by name:
//! registering the same name again replaces the earlier entry. The registry is
//! plain data; the orchestrator snapshots it at the start of every round so a
//! registration racing an in-flight conversation only affects later rounds.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::LlmError;
use crate::types::{ToolCall, ToolSpec};

/// A callable tool body.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute with parsed JSON arguments and return a JSON result.
    async fn call(&self, arguments: Value) -> Result<Value, LlmError>;
}

struct AsyncFnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for AsyncFnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, LlmError>> + Send,
{
    async fn call(&self, arguments: Value) -> Result<Value, LlmError> {
        (self.0)(arguments).await
    }
}

struct SyncFnHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for SyncFnHandler<F>
where
    F: Fn(Value) -> Result<Value, LlmError> + Send + Sync,
{
    async fn call(&self, arguments: Value) -> Result<Value, LlmError> {
        (self.0)(arguments)
    }
}

/// A registered tool: its schema plus the handler.
#[derive(Clone)]
pub struct ToolDefinition {
    pub spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Mapping from tool name to definition.
#[derive(Clone, Default, Debug)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Returns the definition it replaced, if any.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl ToolHandler + 'static,
        description: impl Into<String>,
        json_schema: Value,
    ) -> Option<ToolDefinition> {
        let spec = ToolSpec::new(name, description, json_schema);
        let previous = self.tools.insert(
            spec.name.clone(),
            ToolDefinition {
                spec,
                handler: Arc::new(handler),
            },
        );
        if let Some(prev) = &previous {
            tracing::debug!(tool = %prev.spec.name, "replacing registered tool");
        }
        previous
    }

    /// Register an async closure.
    pub fn register_async<F, Fut>(
        &mut self,
        name: impl Into<String>,
        handler: F,
        description: impl Into<String>,
        json_schema: Value,
    ) -> Option<ToolDefinition>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, LlmError>> + Send + 'static,
    {
        self.register(name, AsyncFnHandler(handler), description, json_schema)
    }

    /// Register a synchronous closure.
    pub fn register_fn<F>(
        &mut self,
        name: impl Into<String>,
        handler: F,
        description: impl Into<String>,
        json_schema: Value,
    ) -> Option<ToolDefinition>
    where
        F: Fn(Value) -> Result<Value, LlmError> + Send + Sync + 'static,
    {
        self.register(name, SyncFnHandler(handler), description, json_schema)
    }

    pub fn unregister(&mut self, name: &str) -> Option<ToolDefinition> {
        self.tools.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All registered definitions, ordered by name.
    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().cloned().collect()
    }

    /// Schemas only.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec.clone()).collect()
    }

    /// `[{type: function, function: {...}}]`
    pub fn openai_definitions(&self) -> Vec<Value> {
        self.tools.values().map(|t| t.spec.to_openai()).collect()
    }

    /// `[{name, description, input_schema}]`
    pub fn anthropic_definitions(&self) -> Vec<Value> {
        self.tools.values().map(|t| t.spec.to_anthropic()).collect()
    }

    /// Execute a call and stringify its result.
    ///
    /// Arguments are parsed from the call's raw text first; invalid JSON fails
    /// closed with [`LlmError::InvalidToolArguments`] without running the
    /// handler.
    pub async fn execute(&self, call: &ToolCall) -> Result<String, LlmError> {
        let tool = self
            .get(call.name())
            .ok_or_else(|| LlmError::ToolNotFound(call.name().to_string()))?;
        let arguments = call.parsed_arguments()?;
        let handler = tool.handler();
        let output = handler.call(arguments).await.map_err(|e| match e {
            LlmError::ToolExecution(_) => e,
            other => LlmError::ToolExecution(other.to_string()),
        })?;
        Ok(stringify_tool_output(output))
    }
}

/// Tool output as message text: strings verbatim, everything else as JSON.
pub fn stringify_tool_output(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Registry shared between a client and its in-flight conversations.
#[derive(Clone, Default, Debug)]
pub struct SharedToolRegistry {
    inner: Arc<RwLock<ToolRegistry>>,
}

impl SharedToolRegistry {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }

    /// Apply a mutation under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut ToolRegistry) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Point-in-time copy. Handlers are shared, not cloned.
    pub fn snapshot(&self) -> ToolRegistry {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({"type": "object", "properties": {"location": {"type": "string"}}})
    }

    #[tokio::test]
    async fn executes_sync_and_async_handlers() {
        let mut registry = ToolRegistry::new();
        registry.register_fn(
            "echo",
            |args| Ok(args["text"].clone()),
            "Echo text",
            json!({"type": "object"}),
        );
        registry.register_async(
            "get_weather",
            |args: Value| async move {
                Ok(json!({"location": args["location"], "forecast": "sunny"}))
            },
            "Weather lookup",
            schema(),
        );

        let out = registry
            .execute(&ToolCall::function("1", "echo", r#"{"text":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(out, "hi");

        let out = registry
            .execute(&ToolCall::function("2", "get_weather", r#"{"location":"Paris"}"#))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["forecast"], "sunny");
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_are_errors() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("echo", |args| Ok(args), "Echo", json!({}));

        let err = registry
            .execute(&ToolCall::function("1", "missing", "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ToolNotFound(_)));

        let err = registry
            .execute(&ToolCall::function("2", "echo", "{not json"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidToolArguments { .. }));
    }

    #[test]
    fn handler_failure_becomes_tool_execution_error() {
        let mut registry = ToolRegistry::new();
        registry.register_fn(
            "boom",
            |_| Err(LlmError::InvalidParameter("nope".into())),
            "Always fails",
            json!({}),
        );
        let err = tokio_test::block_on(registry.execute(&ToolCall::function("1", "boom", "{}")))
            .unwrap_err();
        assert!(matches!(err, LlmError::ToolExecution(msg) if msg.contains("nope")));
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register_fn("t", |a| Ok(a), "first", json!({})).is_none());
        let replaced = registry.register_fn("t", |a| Ok(a), "second", json!({}));
        assert_eq!(replaced.map(|d| d.spec.description), Some("first".to_string()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.specs()[0].description, "second");
    }

    #[test]
    fn snapshot_is_isolated_from_later_registration() {
        let shared = SharedToolRegistry::default();
        shared.update(|r| r.register_fn("a", |v| Ok(v), "A", json!({})));
        let snap = shared.snapshot();
        shared.update(|r| r.register_fn("b", |v| Ok(v), "B", json!({})));
        assert_eq!(snap.len(), 1);
        assert_eq!(shared.snapshot().len(), 2);
    }

    #[test]
    fn provider_renderings_come_from_one_entry() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("get_weather", |v| Ok(v), "Weather", schema());
        assert_eq!(
            registry.openai_definitions()[0]["function"]["parameters"],
            registry.anthropic_definitions()[0]["input_schema"]
        );
    }
}
