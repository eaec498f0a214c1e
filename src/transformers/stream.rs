//! Stream chunk normalization
//!
//! Each engine chunk is handled independently: parsed as JSON, or as an SSE
//! `data:` line, or finally passed through as raw text. Parsed chunks are
//! dispatched on their shape to a dialect converter that emits
//! [`StreamDelta`]s.

use serde_json::Value;

use crate::engine::DONE;
use crate::standards::{anthropic::AnthropicStandard, gemini::GeminiStandard, openai::OpenAiStandard};
use crate::types::{FinishReason, ToolCall};

/// One canonical event extracted from a stream chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// Answer text.
    Text(String),
    /// Reasoning text (`reasoning_content`, Anthropic thinking, Gemini thoughts).
    Reasoning(String),
    /// Part of a tool call. Fragments sharing `index` belong to one call;
    /// `arguments` pieces are concatenated in arrival order.
    ToolCallFragment {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    /// A tool call delivered whole (Gemini).
    ToolCall(ToolCall),
    /// The provider reported why it stopped.
    Finish(FinishReason),
    /// Provider end-of-message marker (Anthropic `message_stop`).
    RoundEnd,
    /// The engine's end-of-stream sentinel.
    Done,
}

/// Convert one parsed stream chunk of a given dialect.
pub trait StreamChunkTransformer: Send + Sync {
    /// Provider identifier
    fn provider_id(&self) -> &'static str;

    /// Whether the chunk has this dialect's shape.
    fn matches_chunk(&self, chunk: &Value) -> bool;

    /// Convert to zero or more deltas.
    fn convert_chunk(&self, chunk: &Value) -> Vec<StreamDelta>;
}

fn stream_transformers() -> [&'static dyn StreamChunkTransformer; 3] {
    [&OpenAiStandard, &GeminiStandard, &AnthropicStandard]
}

enum Payload {
    Json(Value),
    Done,
    Raw,
}

fn parse_chunk(chunk: &str) -> Payload {
    let trimmed = chunk.trim();
    if trimmed == DONE {
        return Payload::Done;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Payload::Json(value);
    }
    if let Some(data) = trimmed.strip_prefix("data:") {
        let data = data.trim();
        if data == DONE {
            return Payload::Done;
        }
        if let Ok(value) = serde_json::from_str::<Value>(data) {
            return Payload::Json(value);
        }
    }
    Payload::Raw
}

/// Turns engine stream chunks into deltas.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamNormalizer;

impl StreamNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize_chunk(&self, chunk: &str) -> Vec<StreamDelta> {
        match parse_chunk(chunk) {
            Payload::Done => vec![StreamDelta::Done],
            Payload::Raw if chunk.trim().is_empty() => Vec::new(),
            Payload::Raw => vec![StreamDelta::Text(chunk.to_string())],
            Payload::Json(Value::Object(map)) => {
                let value = Value::Object(map);
                if let Some(t) = stream_transformers()
                    .into_iter()
                    .find(|t| t.matches_chunk(&value))
                {
                    return t.convert_chunk(&value);
                }
                if let Some(error) = value.get("error") {
                    tracing::warn!(error = %error, "stream carried an error payload");
                } else {
                    tracing::debug!("ignoring unrecognized stream chunk");
                }
                Vec::new()
            }
            Payload::Json(Value::String(text)) => vec![StreamDelta::Text(text)],
            Payload::Json(_) => vec![StreamDelta::Text(chunk.to_string())],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sentinel_in_both_forms_means_done() {
        let n = StreamNormalizer::new();
        assert_eq!(n.normalize_chunk("[DONE]"), vec![StreamDelta::Done]);
        assert_eq!(n.normalize_chunk("data: [DONE]\n"), vec![StreamDelta::Done]);
    }

    #[test]
    fn strips_sse_prefix_before_parsing() {
        let chunk = format!(
            "data: {}",
            json!({"choices": [{"delta": {"content": "Hel"}}]})
        );
        assert_eq!(
            StreamNormalizer::new().normalize_chunk(&chunk),
            vec![StreamDelta::Text("Hel".to_string())]
        );
    }

    #[test]
    fn unparseable_chunk_passes_through_as_text() {
        assert_eq!(
            StreamNormalizer::new().normalize_chunk("data: not json"),
            vec![StreamDelta::Text("data: not json".to_string())]
        );
        assert!(StreamNormalizer::new().normalize_chunk("  \n").is_empty());
    }

    #[test]
    fn error_payload_is_dropped() {
        let chunk = json!({"error": {"message": "overloaded"}}).to_string();
        assert!(StreamNormalizer::new().normalize_chunk(&chunk).is_empty());
    }

    #[test]
    fn anthropic_stop_ends_round() {
        let n = StreamNormalizer::new();
        let delta = json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "Hi"}
        });
        assert_eq!(
            n.normalize_chunk(&delta.to_string()),
            vec![StreamDelta::Text("Hi".to_string())]
        );
        assert_eq!(
            n.normalize_chunk(r#"{"type":"message_stop"}"#),
            vec![StreamDelta::RoundEnd]
        );
    }

    #[test]
    fn gemini_text_part() {
        let chunk = json!({"candidates": [{"content": {"parts": [{"text": "Bon"}]}}]});
        assert_eq!(
            StreamNormalizer::new().normalize_chunk(&chunk.to_string()),
            vec![StreamDelta::Text("Bon".to_string())]
        );
    }
}
