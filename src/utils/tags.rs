//! Text-embedded conventions inside OpenAI-compatible content.
//!
//! Some models served through OpenAI-compatible endpoints do not use the
//! structured `tool_calls` / `reasoning_content` fields. Instead they inline a
//! `<think>...</think>` block before the answer, or emit
//! `<function-call>{"name": ..., "arguments": ...}</function-call>` in the
//! text. Both are lifted out here so callers see the same shape as a native
//! response.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::types::ToolCall;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

static FUNCTION_CALL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)<function-call>\s*(.*?)\s*</function-call>").ok());

/// Split a `<think>` block from the answer.
///
/// Returns `(reasoning, output)`. Text without a closing tag is returned as
/// output unchanged. A closing tag with no opening tag (some models omit the
/// opener) treats everything before it as reasoning.
pub fn split_reasoning(text: &str) -> (Option<String>, String) {
    let Some(close) = text.find(THINK_CLOSE) else {
        return (None, text.to_string());
    };

    let head = &text[..close];
    let reasoning = match head.find(THINK_OPEN) {
        Some(open) => &head[open + THINK_OPEN.len()..],
        None => head,
    };
    let prefix = head
        .find(THINK_OPEN)
        .map(|open| head[..open].trim())
        .unwrap_or_default();
    let rest = text[close + THINK_CLOSE.len()..].trim();

    let output = if prefix.is_empty() {
        rest.to_string()
    } else if rest.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}\n{rest}")
    };

    let reasoning = reasoning.trim();
    let reasoning = (!reasoning.is_empty()).then(|| reasoning.to_string());
    (reasoning, output)
}

/// Lift inline `<function-call>` blocks into tool calls.
///
/// Blocks whose body is not a JSON object with a string `name` stay in the
/// text untouched. `arguments` may be an object or an already-encoded string.
pub fn extract_function_calls(text: &str) -> (String, Vec<ToolCall>) {
    let mut calls = Vec::new();
    let Some(re) = FUNCTION_CALL_RE.as_ref() else {
        return (text.to_string(), calls);
    };
    let mut remaining = String::with_capacity(text.len());
    let mut last = 0;

    for caps in re.captures_iter(text) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Some(call) = parse_inline_call(body.as_str()) else {
            tracing::debug!("ignoring malformed inline function call");
            continue;
        };
        remaining.push_str(&text[last..whole.start()]);
        last = whole.end();
        calls.push(call);
    }

    if calls.is_empty() {
        return (text.to_string(), calls);
    }
    remaining.push_str(&text[last..]);
    (remaining.trim().to_string(), calls)
}

fn parse_inline_call(body: &str) -> Option<ToolCall> {
    let value: Value = serde_json::from_str(body).ok()?;
    let name = value.get("name")?.as_str()?;
    let id = crate::standards::generate_call_id();
    Some(match value.get("arguments") {
        Some(Value::String(raw)) => ToolCall::function(id, name, raw.as_str()),
        Some(args) => ToolCall::from_value(id, name, args),
        None => ToolCall::function(id, name, "{}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_think_block() {
        let (reasoning, output) =
            split_reasoning("<think>\nuser wants a sum\n</think>\n\n2 + 2 = 4");
        assert_eq!(reasoning.as_deref(), Some("user wants a sum"));
        assert_eq!(output, "2 + 2 = 4");
    }

    #[test]
    fn handles_missing_open_tag() {
        let (reasoning, output) = split_reasoning("hmm, easy</think>4");
        assert_eq!(reasoning.as_deref(), Some("hmm, easy"));
        assert_eq!(output, "4");
    }

    #[test]
    fn text_without_tags_is_untouched() {
        let (reasoning, output) = split_reasoning("just an <think> answer");
        assert!(reasoning.is_none());
        assert_eq!(output, "just an <think> answer");
    }

    #[test]
    fn lifts_inline_function_call() {
        let text = r#"Let me check.
<function-call>{"name": "get_weather", "arguments": {"location": "Paris"}}</function-call>"#;
        let (rest, calls) = extract_function_calls(text);
        assert_eq!(rest, "Let me check.");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name(), "get_weather");
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(
            calls[0].parsed_arguments().unwrap(),
            json!({"location": "Paris"})
        );
    }

    #[test]
    fn accepts_string_encoded_arguments() {
        let text = r#"<function-call>{"name": "add", "arguments": "{\"a\": 1}"}</function-call>"#;
        let (rest, calls) = extract_function_calls(text);
        assert!(rest.is_empty());
        assert_eq!(calls[0].parsed_arguments().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn malformed_block_stays_as_text() {
        let text = "<function-call>not json</function-call>";
        let (rest, calls) = extract_function_calls(text);
        assert!(calls.is_empty());
        assert_eq!(rest, text);
    }
}
