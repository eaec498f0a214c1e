//! Anthropic Messages dialect
//!
//! <https://docs.anthropic.com/en/api/messages>

use serde_json::{Value, json};

use crate::error::LlmError;
use crate::transformers::{
    ChatContext, NormalizedResponse, RequestTransformer, ResponseTransformer,
    StreamChunkTransformer, StreamDelta,
};
use crate::types::{ChatMessage, ContentPart, FinishReason, MessageContent, MessageRole, ToolCall};

use super::generate_call_id;

/// `max_tokens` is mandatory on this API.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicStandard;

/// Split `data:<mime>;base64,<data>` into its parts.
fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let media_type = meta.strip_suffix(";base64")?;
    Some((media_type, data))
}

/// Content blocks for a user or assistant turn.
pub fn convert_message_content(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(text) if text.is_empty() => Vec::new(),
        MessageContent::Text(text) => vec![json!({"type": "text", "text": text})],
        MessageContent::MultiModal(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => json!({"type": "text", "text": text}),
                ContentPart::ImageUrl { image_url } => match parse_data_url(&image_url.url) {
                    Some((media_type, data)) => json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": media_type, "data": data}
                    }),
                    None => json!({
                        "type": "image",
                        "source": {"type": "url", "url": image_url.url}
                    }),
                },
            })
            .collect(),
    }
}

/// Split system text out and remap the rest to `user`/`assistant` turns.
///
/// Tool results become `tool_result` blocks inside a user turn; consecutive
/// results share one turn.
pub fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system = Vec::new();
    let mut out: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();

    let flush = |out: &mut Vec<Value>, pending: &mut Vec<Value>| {
        if !pending.is_empty() {
            out.push(json!({"role": "user", "content": std::mem::take(pending)}));
        }
    };

    for msg in messages {
        match msg.role {
            MessageRole::System => system.push(msg.content.all_text()),
            MessageRole::Tool => pending_results.push(json!({
                "type": "tool_result",
                "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                "content": msg.content.all_text(),
            })),
            MessageRole::User => {
                flush(&mut out, &mut pending_results);
                let content = match &msg.content {
                    MessageContent::Text(text) => json!(text),
                    other => Value::Array(convert_message_content(other)),
                };
                out.push(json!({"role": "user", "content": content}));
            }
            MessageRole::Assistant => {
                flush(&mut out, &mut pending_results);
                if msg.tool_calls.is_empty() {
                    out.push(json!({"role": "assistant", "content": msg.content.all_text()}));
                    continue;
                }
                let mut blocks = convert_message_content(&msg.content);
                for call in &msg.tool_calls {
                    let input = call
                        .parsed_arguments()
                        .unwrap_or_else(|_| Value::Object(Default::default()));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name(),
                        "input": input,
                    }));
                }
                out.push(json!({"role": "assistant", "content": blocks}));
            }
        }
    }
    flush(&mut out, &mut pending_results);

    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, out)
}

impl RequestTransformer for AnthropicStandard {
    fn provider_id(&self) -> &'static str {
        "anthropic"
    }

    fn endpoint(&self, _model: &str, _stream: bool) -> String {
        "messages".to_string()
    }

    fn auth_headers(&self, api_key: &str) -> Vec<(String, String)> {
        vec![
            ("x-api-key".to_string(), api_key.to_string()),
            ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
        ]
    }

    fn transform_chat(&self, ctx: &ChatContext<'_>) -> Result<Value, LlmError> {
        let (system, messages) = convert_messages(ctx.messages);
        if messages.is_empty() {
            return Err(LlmError::EmptyRequest(
                "Anthropic requests need at least one non-system message".to_string(),
            ));
        }

        let mut body = json!({
            "model": ctx.model,
            "messages": messages,
            "max_tokens": ctx.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": ctx.stream,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if !ctx.tools.is_empty() {
            body["tools"] = Value::Array(ctx.tools.iter().map(|t| t.to_anthropic()).collect());
        }
        Ok(body)
    }
}

impl ResponseTransformer for AnthropicStandard {
    fn provider_id(&self) -> &'static str {
        "anthropic"
    }

    fn matches(&self, raw: &Value) -> bool {
        raw.get("type").and_then(Value::as_str) == Some("message")
            && raw.get("content").is_some_and(Value::is_array)
    }

    fn transform_chat_response(&self, raw: &Value) -> NormalizedResponse {
        let mut text = String::new();
        let mut reasoning = String::new();
        let mut tool_calls = Vec::new();

        for block in raw["content"].as_array().into_iter().flatten() {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    text.push_str(block.get("text").and_then(Value::as_str).unwrap_or_default())
                }
                Some("thinking") => reasoning.push_str(
                    block
                        .get("thinking")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                ),
                Some("tool_use") => {
                    let Some(name) = block.get("name").and_then(Value::as_str) else {
                        continue;
                    };
                    let id = block
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(generate_call_id);
                    let input = block.get("input").cloned().unwrap_or(Value::Null);
                    tool_calls.push(ToolCall::from_value(id, name, &input));
                }
                _ => {}
            }
        }

        NormalizedResponse {
            text,
            reasoning: (!reasoning.is_empty()).then_some(reasoning),
            tool_calls,
            finish_reason: raw
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(FinishReason::parse),
            raw: raw.clone(),
        }
    }
}

impl StreamChunkTransformer for AnthropicStandard {
    fn provider_id(&self) -> &'static str {
        "anthropic"
    }

    fn matches_chunk(&self, chunk: &Value) -> bool {
        chunk.get("type").is_some_and(Value::is_string)
    }

    fn convert_chunk(&self, chunk: &Value) -> Vec<StreamDelta> {
        let index = chunk
            .get("index")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;

        match chunk.get("type").and_then(Value::as_str) {
            Some("content_block_start") => {
                let block = &chunk["content_block"];
                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => vec![StreamDelta::ToolCallFragment {
                        index,
                        id: block.get("id").and_then(Value::as_str).map(str::to_string),
                        name: block.get("name").and_then(Value::as_str).map(str::to_string),
                        arguments: None,
                    }],
                    Some("text") => block
                        .get("text")
                        .and_then(Value::as_str)
                        .filter(|t| !t.is_empty())
                        .map(|t| vec![StreamDelta::Text(t.to_string())])
                        .unwrap_or_default(),
                    _ => Vec::new(),
                }
            }
            Some("content_block_delta") => {
                let delta = &chunk["delta"];
                let field = |key: &str| delta.get(key).and_then(Value::as_str).map(str::to_string);
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => field("text").map(StreamDelta::Text).into_iter().collect(),
                    Some("thinking_delta") => field("thinking")
                        .map(StreamDelta::Reasoning)
                        .into_iter()
                        .collect(),
                    Some("input_json_delta") => vec![StreamDelta::ToolCallFragment {
                        index,
                        id: None,
                        name: None,
                        arguments: field("partial_json"),
                    }],
                    _ => Vec::new(),
                }
            }
            Some("message_delta") => chunk
                .pointer("/delta/stop_reason")
                .and_then(Value::as_str)
                .map(|r| vec![StreamDelta::Finish(FinishReason::parse(r))])
                .unwrap_or_default(),
            Some("message_stop") => vec![StreamDelta::RoundEnd],
            Some("error") => {
                tracing::warn!(error = %chunk["error"], "anthropic stream error event");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}
