//! Non-streaming response normalization
//!
//! The engine hands back one opaque string per round. It is parsed as JSON and
//! dispatched on its top-level shape; anything unrecognized (including text
//! that is not JSON at all) becomes literal text. Normalization never fails.

use serde_json::Value;

use crate::standards::{anthropic::AnthropicStandard, gemini::GeminiStandard, openai::OpenAiStandard};
use crate::types::{CompletionResult, FinishReason, ToolCall};

/// Canonical view of one round's output.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedResponse {
    pub text: String,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub raw: Value,
}

impl NormalizedResponse {
    /// Literal-text result for output no dialect recognized.
    pub fn literal(text: impl Into<String>, raw: Value) -> Self {
        Self {
            text: text.into(),
            raw,
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Terminal result for the caller.
    pub fn into_result(self) -> CompletionResult {
        CompletionResult::new(self.text, self.reasoning, self.raw)
    }
}

/// Convert a provider response body into a [`NormalizedResponse`].
pub trait ResponseTransformer: Send + Sync {
    /// Provider identifier
    fn provider_id(&self) -> &'static str;

    /// Whether `raw` has this dialect's top-level shape.
    fn matches(&self, raw: &Value) -> bool;

    /// Extract text, reasoning and tool calls.
    fn transform_chat_response(&self, raw: &Value) -> NormalizedResponse;
}

/// Dialects in detection order.
fn response_transformers() -> [&'static dyn ResponseTransformer; 3] {
    [&GeminiStandard, &OpenAiStandard, &AnthropicStandard]
}

/// Normalize one engine response string.
pub fn normalize_response(body: &str) -> NormalizedResponse {
    let Ok(raw) = serde_json::from_str::<Value>(body) else {
        tracing::debug!("response is not JSON; treating as literal text");
        return NormalizedResponse::literal(body, Value::String(body.to_string()));
    };

    if let Some(transformer) = response_transformers().into_iter().find(|t| t.matches(&raw)) {
        let normalized = transformer.transform_chat_response(&raw);
        tracing::debug!(
            provider = transformer.provider_id(),
            tool_calls = normalized.tool_calls.len(),
            text_len = normalized.text.len(),
            "normalized response"
        );
        return normalized;
    }

    if let Some(error) = raw.get("error") {
        tracing::warn!(error = %error, "provider returned an error body");
    }
    NormalizedResponse::literal(body, raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malformed_json_becomes_literal_text() {
        let normalized = normalize_response("plain words, not json");
        assert_eq!(normalized.text, "plain words, not json");
        assert!(normalized.tool_calls.is_empty());
        assert_eq!(normalized.raw, json!("plain words, not json"));
    }

    #[test]
    fn dispatches_on_choices() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "4"}, "finish_reason": "stop"}]
        })
        .to_string();
        let normalized = normalize_response(&body);
        assert_eq!(normalized.text, "4");
        assert_eq!(normalized.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn dispatches_on_candidates() {
        let body = json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Bonjour"}]}}]
        })
        .to_string();
        assert_eq!(normalize_response(&body).text, "Bonjour");
    }

    #[test]
    fn dispatches_on_native_anthropic_message() {
        let body = json!({
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "Hello"}],
            "stop_reason": "end_turn"
        })
        .to_string();
        let normalized = normalize_response(&body);
        assert_eq!(normalized.text, "Hello");
        assert_eq!(normalized.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn unknown_object_is_returned_verbatim() {
        let body = r#"{"error":{"message":"bad key"}}"#;
        let normalized = normalize_response(body);
        assert_eq!(normalized.text, body);
        assert_eq!(normalized.raw["error"]["message"], "bad key");
    }
}
