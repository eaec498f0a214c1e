//! Gemini `generateContent` dialect

use serde_json::{Value, json};

use crate::error::LlmError;
use crate::transformers::{
    ChatContext, NormalizedResponse, RequestTransformer, ResponseTransformer,
    StreamChunkTransformer, StreamDelta,
};
use crate::types::{ChatMessage, ContentPart, FinishReason, MessageContent, MessageRole, ToolCall};

use super::generate_call_id;

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiStandard;

fn convert_parts(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(text) if text.is_empty() => Vec::new(),
        MessageContent::Text(text) => vec![json!({"text": text})],
        MessageContent::MultiModal(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => json!({"text": text}),
                ContentPart::ImageUrl { image_url } => {
                    let inline = image_url
                        .url
                        .strip_prefix("data:")
                        .and_then(|rest| rest.split_once(','))
                        .and_then(|(meta, data)| {
                            meta.strip_suffix(";base64").map(|mime| (mime, data))
                        });
                    match inline {
                        Some((mime_type, data)) => {
                            json!({"inline_data": {"mime_type": mime_type, "data": data}})
                        }
                        None => json!({"file_data": {"file_uri": image_url.url}}),
                    }
                }
            })
            .collect(),
    }
}

/// Tool results are answered by tool name, not id.
fn tool_response_part(msg: &ChatMessage) -> Value {
    json!({
        "functionResponse": {
            "name": msg.name.clone().unwrap_or_default(),
            "response": {"content": msg.content.all_text()},
        }
    })
}

/// `(system_instruction, contents)`
pub fn convert_messages(messages: &[ChatMessage]) -> (Option<Value>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for msg in messages {
        match msg.role {
            MessageRole::System => system_parts.extend(convert_parts(&msg.content)),
            MessageRole::User => {
                contents.push(json!({"role": "user", "parts": convert_parts(&msg.content)}))
            }
            MessageRole::Assistant => {
                let mut parts = convert_parts(&msg.content);
                for call in &msg.tool_calls {
                    let args = call
                        .parsed_arguments()
                        .unwrap_or_else(|_| Value::Object(Default::default()));
                    parts.push(json!({"functionCall": {"name": call.name(), "args": args}}));
                }
                contents.push(json!({"role": "model", "parts": parts}));
            }
            MessageRole::Tool => {
                contents.push(json!({"role": "user", "parts": [tool_response_part(msg)]}))
            }
        }
    }

    let system = (!system_parts.is_empty()).then(|| json!({"parts": system_parts}));
    (system, contents)
}

impl RequestTransformer for GeminiStandard {
    fn provider_id(&self) -> &'static str {
        "gemini"
    }

    fn endpoint(&self, model: &str, stream: bool) -> String {
        if stream {
            format!("models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("models/{model}:generateContent")
        }
    }

    fn auth_headers(&self, api_key: &str) -> Vec<(String, String)> {
        vec![("x-goog-api-key".to_string(), api_key.to_string())]
    }

    fn transform_chat(&self, ctx: &ChatContext<'_>) -> Result<Value, LlmError> {
        let (system, contents) = convert_messages(ctx.messages);
        if contents.is_empty() {
            return Err(LlmError::EmptyRequest(
                "Gemini requests need at least one non-system message".to_string(),
            ));
        }

        let mut body = json!({ "contents": contents });
        if let Some(system) = system {
            body["system_instruction"] = system;
        }
        if let Some(max_tokens) = ctx.max_tokens {
            body["generationConfig"] = json!({ "maxOutputTokens": max_tokens });
        }

        let mut tools = Vec::new();
        if !ctx.tools.is_empty() {
            let declarations: Vec<Value> = ctx.tools.iter().map(|t| t.to_gemini()).collect();
            tools.push(json!({ "function_declarations": declarations }));
            body["tool_config"] = json!({
                "function_calling_config": { "mode": "AUTO" }
            });
        }
        if ctx.grounding {
            tools.push(json!({ "google_search": {} }));
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }
        Ok(body)
    }
}

/// Deltas for every part of the first candidate.
fn candidate_deltas(raw: &Value) -> Vec<StreamDelta> {
    let mut out = Vec::new();
    let Some(candidate) = raw.pointer("/candidates/0") else {
        return out;
    };

    for part in candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(call) = part.get("functionCall") {
            let Some(name) = call.get("name").and_then(Value::as_str) else {
                continue;
            };
            let args = call.get("args").cloned().unwrap_or(Value::Null);
            out.push(StreamDelta::ToolCall(ToolCall::from_value(
                generate_call_id(),
                name,
                &args,
            )));
        } else if let Some(text) = part.get("text").and_then(Value::as_str) {
            if text.is_empty() {
                continue;
            }
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                out.push(StreamDelta::Reasoning(text.to_string()));
            } else {
                out.push(StreamDelta::Text(text.to_string()));
            }
        }
    }

    if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
        out.push(StreamDelta::Finish(FinishReason::parse(reason)));
    }
    out
}

impl ResponseTransformer for GeminiStandard {
    fn provider_id(&self) -> &'static str {
        "gemini"
    }

    fn matches(&self, raw: &Value) -> bool {
        raw.get("candidates").is_some_and(Value::is_array)
    }

    fn transform_chat_response(&self, raw: &Value) -> NormalizedResponse {
        let mut normalized = NormalizedResponse {
            raw: raw.clone(),
            ..Default::default()
        };
        let mut reasoning = String::new();
        for delta in candidate_deltas(raw) {
            match delta {
                StreamDelta::Text(text) => normalized.text.push_str(&text),
                StreamDelta::Reasoning(text) => reasoning.push_str(&text),
                StreamDelta::ToolCall(call) => normalized.tool_calls.push(call),
                StreamDelta::Finish(reason) => normalized.finish_reason = Some(reason),
                _ => {}
            }
        }
        normalized.reasoning = (!reasoning.is_empty()).then_some(reasoning);
        normalized
    }
}

impl StreamChunkTransformer for GeminiStandard {
    fn provider_id(&self) -> &'static str {
        "gemini"
    }

    fn matches_chunk(&self, chunk: &Value) -> bool {
        chunk.get("candidates").is_some_and(Value::is_array)
    }

    fn convert_chunk(&self, chunk: &Value) -> Vec<StreamDelta> {
        candidate_deltas(chunk)
    }
}
