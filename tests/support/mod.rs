//! Shared fixtures: provider-shaped response bodies and client setup.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bhumi::prelude::*;
use serde_json::{Value, json};

/// OpenAI chat completion carrying plain text.
pub fn openai_text(text: &str) -> String {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }]
    })
    .to_string()
}

/// OpenAI chat completion requesting one tool call.
pub fn openai_tool_call(id: &str, name: &str, arguments: Value) -> String {
    json!({
        "id": "chatcmpl-456",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments.to_string()}
                }]
            },
            "finish_reason": "tool_calls"
        }]
    })
    .to_string()
}

/// OpenAI stream chunk with a text delta.
pub fn openai_text_chunk(text: &str) -> String {
    json!({"choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]}).to_string()
}

/// OpenAI stream chunk with a finish reason and an empty delta.
pub fn openai_finish_chunk(reason: &str) -> String {
    json!({"choices": [{"index": 0, "delta": {}, "finish_reason": reason}]}).to_string()
}

/// OpenAI stream chunk with one tool-call fragment.
pub fn openai_tool_fragment(
    index: usize,
    id: Option<&str>,
    name: Option<&str>,
    arguments: &str,
) -> String {
    let mut function = json!({"arguments": arguments});
    if let Some(name) = name {
        function["name"] = json!(name);
    }
    let mut call = json!({"index": index, "type": "function", "function": function});
    if let Some(id) = id {
        call["id"] = json!(id);
    }
    json!({"choices": [{"index": 0, "delta": {"tool_calls": [call]}, "finish_reason": null}]})
        .to_string()
}

pub fn weather_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"location": {"type": "string"}},
        "required": ["location"]
    })
}

pub fn weather_config() -> LlmConfig {
    LlmConfig::new("test-key", "openai/gpt-4o-mini")
        .with_poll_interval(Duration::from_millis(1))
        .with_buffer(BufferConfig::Fixed { size: 4096 })
}

/// Client over a scripted engine with `get_weather` registered.
pub fn weather_client(engine: Arc<ScriptedEngine>, config: LlmConfig) -> LlmClient {
    let client = LlmClient::with_engine(config, engine).expect("client");
    client.register_fn(
        "get_weather",
        |args| {
            let location = args["location"].as_str().unwrap_or("unknown").to_string();
            Ok(json!({"location": location, "forecast": "sunny", "temperature_c": 22}))
        },
        "Get the current weather for a location",
        weather_schema(),
    );
    client
}

/// Messages array of a submitted OpenAI-dialect body.
pub fn messages_of(body: &Value) -> Vec<Value> {
    body["messages"].as_array().cloned().unwrap_or_default()
}
