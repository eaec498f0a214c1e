//! OpenAI Chat Completions dialect
//!
//! Shared by OpenAI itself, the OpenAI-compatible hosts (groq, openrouter,
//! sambanova, cerebras, mistral) and the generic fallback.

use serde_json::{Map, Value, json};

use crate::error::LlmError;
use crate::transformers::{
    ChatContext, NormalizedResponse, RequestTransformer, ResponseTransformer,
    StreamChunkTransformer, StreamDelta,
};
use crate::types::{ChatMessage, FinishReason, MessageRole, ToolCall};
use crate::utils::{extract_function_calls, split_reasoning};

use super::generate_call_id;

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiStandard;

/// Convert one canonical message to the Chat Completions shape.
pub fn convert_message(msg: &ChatMessage) -> Result<Value, LlmError> {
    let mut out = Map::new();
    out.insert("role".to_string(), json!(msg.role.as_str()));

    let content = serde_json::to_value(&msg.content)?;
    if msg.role == MessageRole::Assistant && !msg.tool_calls.is_empty() {
        let empty = msg.content.is_empty();
        out.insert(
            "content".to_string(),
            if empty { Value::Null } else { content },
        );
        out.insert(
            "tool_calls".to_string(),
            serde_json::to_value(&msg.tool_calls)?,
        );
    } else {
        out.insert("content".to_string(), content);
    }

    match msg.role {
        MessageRole::Tool => {
            if let Some(id) = &msg.tool_call_id {
                out.insert("tool_call_id".to_string(), json!(id));
            }
        }
        _ => {
            if let Some(name) = &msg.name {
                out.insert("name".to_string(), json!(name));
            }
        }
    }
    Ok(Value::Object(out))
}

impl RequestTransformer for OpenAiStandard {
    fn provider_id(&self) -> &'static str {
        "openai"
    }

    fn endpoint(&self, _model: &str, _stream: bool) -> String {
        "chat/completions".to_string()
    }

    fn auth_headers(&self, api_key: &str) -> Vec<(String, String)> {
        vec![("Authorization".to_string(), format!("Bearer {api_key}"))]
    }

    fn transform_chat(&self, ctx: &ChatContext<'_>) -> Result<Value, LlmError> {
        let messages = ctx
            .messages
            .iter()
            .map(convert_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut body = json!({
            "model": ctx.model,
            "messages": messages,
            "stream": ctx.stream,
        });
        if let Some(max_tokens) = ctx.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !ctx.tools.is_empty() {
            body["tools"] = Value::Array(ctx.tools.iter().map(|t| t.to_openai()).collect());
        }
        Ok(body)
    }
}

fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn reasoning_field(obj: &Value) -> Option<String> {
    ["reasoning_content", "reasoning"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_tool_call(call: &Value) -> Option<ToolCall> {
    let function = call.get("function")?;
    let name = function.get("name")?.as_str()?;
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(generate_call_id);
    Some(match function.get("arguments") {
        Some(Value::String(raw)) => ToolCall::function(id, name, raw.as_str()),
        Some(args) => ToolCall::from_value(id, name, args),
        None => ToolCall::function(id, name, "{}"),
    })
}

impl ResponseTransformer for OpenAiStandard {
    fn provider_id(&self) -> &'static str {
        "openai"
    }

    fn matches(&self, raw: &Value) -> bool {
        raw.get("choices").is_some_and(Value::is_array)
    }

    fn transform_chat_response(&self, raw: &Value) -> NormalizedResponse {
        let choice = raw.pointer("/choices/0");
        let message = choice.and_then(|c| c.get("message"));

        let content = content_text(message.and_then(|m| m.get("content")));
        let (think, content) = split_reasoning(&content);
        let (text, inline_calls) = extract_function_calls(&content);

        let mut tool_calls: Vec<ToolCall> = message
            .and_then(|m| m.get("tool_calls"))
            .and_then(Value::as_array)
            .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
            .unwrap_or_default();
        tool_calls.extend(inline_calls);

        NormalizedResponse {
            text,
            reasoning: message.and_then(reasoning_field).or(think),
            tool_calls,
            finish_reason: choice
                .and_then(|c| c.get("finish_reason"))
                .and_then(Value::as_str)
                .map(FinishReason::parse),
            raw: raw.clone(),
        }
    }
}

impl StreamChunkTransformer for OpenAiStandard {
    fn provider_id(&self) -> &'static str {
        "openai"
    }

    fn matches_chunk(&self, chunk: &Value) -> bool {
        chunk.get("choices").is_some_and(Value::is_array)
    }

    fn convert_chunk(&self, chunk: &Value) -> Vec<StreamDelta> {
        let mut out = Vec::new();
        let Some(choice) = chunk.pointer("/choices/0") else {
            return out;
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(reasoning) = reasoning_field(delta) {
                out.push(StreamDelta::Reasoning(reasoning));
            }
            if let Some(text) = delta.get("content").and_then(Value::as_str)
                && !text.is_empty()
            {
                out.push(StreamDelta::Text(text.to_string()));
            }
            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for (position, call) in calls.iter().enumerate() {
                    let index = call
                        .get("index")
                        .and_then(Value::as_u64)
                        .map(|i| i as usize)
                        .unwrap_or(position);
                    let function = call.get("function");
                    out.push(StreamDelta::ToolCallFragment {
                        index,
                        id: call.get("id").and_then(Value::as_str).map(str::to_string),
                        name: function
                            .and_then(|f| f.get("name"))
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        arguments: function
                            .and_then(|f| f.get("arguments"))
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    });
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            out.push(StreamDelta::Finish(FinishReason::parse(reason)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolSpec;

    #[test]
    fn assistant_tool_call_message_has_null_content() {
        let msg = ChatMessage::assistant("").with_tool_calls(vec![ToolCall::function(
            "call_1",
            "get_weather",
            r#"{"location":"Paris"}"#,
        )]);
        let wire = convert_message(&msg).unwrap();
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["id"], "call_1");
        assert_eq!(wire["tool_calls"][0]["type"], "function");
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"],
            r#"{"location":"Paris"}"#
        );
    }

    #[test]
    fn tool_message_carries_call_id() {
        let wire = convert_message(&ChatMessage::tool("sunny", "call_1", "get_weather")).unwrap();
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_1");
        assert_eq!(wire["content"], "sunny");
    }

    #[test]
    fn body_includes_max_tokens_and_tools() {
        let messages = vec![ChatMessage::user("hi")];
        let tools = vec![ToolSpec::new("t", "d", json!({"type": "object"}))];
        let ctx = ChatContext {
            model: "gpt-4o",
            messages: &messages,
            tools: &tools,
            stream: true,
            max_tokens: Some(64),
            grounding: false,
        };
        let body = OpenAiStandard.transform_chat(&ctx).unwrap();
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["messages"][0], json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn response_tool_calls_and_think_block() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "<think>need weather</think>",
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"location\":\"Oslo\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let normalized = OpenAiStandard.transform_chat_response(&raw);
        assert_eq!(normalized.reasoning.as_deref(), Some("need weather"));
        assert_eq!(normalized.text, "");
        assert_eq!(normalized.tool_calls[0].id, "call_9");
        assert_eq!(normalized.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn inline_function_call_becomes_tool_call() {
        let raw = json!({
            "choices": [{"message": {
                "content": "<function-call>{\"name\":\"get_weather\",\"arguments\":{\"location\":\"Rome\"}}</function-call>"
            }}]
        });
        let normalized = OpenAiStandard.transform_chat_response(&raw);
        assert!(normalized.text.is_empty());
        assert_eq!(normalized.tool_calls.len(), 1);
        assert_eq!(normalized.tool_calls[0].name(), "get_weather");
    }

    #[test]
    fn stream_chunk_tool_fragments_and_finish() {
        let chunk = json!({
            "choices": [{
                "delta": {"tool_calls": [
                    {"index": 0, "id": "call_1", "function": {"name": "get_time"}},
                    {"index": 1, "function": {"arguments": "{\"tz\""}}
                ]},
                "finish_reason": null
            }]
        });
        let deltas = OpenAiStandard.convert_chunk(&chunk);
        assert_eq!(
            deltas,
            vec![
                StreamDelta::ToolCallFragment {
                    index: 0,
                    id: Some("call_1".to_string()),
                    name: Some("get_time".to_string()),
                    arguments: None,
                },
                StreamDelta::ToolCallFragment {
                    index: 1,
                    id: None,
                    name: None,
                    arguments: Some("{\"tz\"".to_string()),
                },
            ]
        );

        let done = json!({"choices": [{"delta": {}, "finish_reason": "stop"}]});
        assert_eq!(
            OpenAiStandard.convert_chunk(&done),
            vec![StreamDelta::Finish(FinishReason::Stop)]
        );
    }

    #[test]
    fn stream_reasoning_content() {
        let chunk = json!({"choices": [{"delta": {"reasoning_content": "hmm", "content": ""}}]});
        assert_eq!(
            OpenAiStandard.convert_chunk(&chunk),
            vec![StreamDelta::Reasoning("hmm".to_string())]
        );
    }
}
