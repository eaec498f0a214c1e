//! Structured output
//!
//! Pulls JSON out of free-form model text and validates it against a JSON
//! Schema. Extraction never fails on its own: text that holds no JSON comes
//! back unchanged as [`Extracted::Text`]. Validation is a separate stage with
//! its own error, [`LlmError::SchemaValidation`].
//!
//! ```rust,ignore
//! use bhumi::structured_output::{extract, Extracted};
//!
//! let value = extract("noise {\"k\":\"v\"} noise");
//! assert_eq!(value, Extracted::Json(serde_json::json!({"k": "v"})));
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::LlmError;

/// Errors reported per failed validation.
const MAX_REPORTED_ERRORS: usize = 3;

static FENCED_BLOCK: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").ok());

/// Outcome of [`extract`].
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Json(Value),
    /// No JSON found; the original text.
    Text(String),
}

impl Extracted {
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }
}

/// Find JSON in `text`.
///
/// Attempts, first success wins: the whole text, the interior of a fenced
/// code block, the first balanced `{...}` or `[...]` span (retried once with
/// trailing commas removed).
pub fn extract(text: &str) -> Extracted {
    match find_json(text) {
        Some(value) => Extracted::Json(value),
        None => Extracted::Text(text.to_string()),
    }
}

/// Like [`extract`] but reports missing JSON as [`LlmError::ExtractionError`].
pub fn extract_json(text: &str) -> Result<Value, LlmError> {
    find_json(text).ok_or_else(|| {
        LlmError::ExtractionError(format!(
            "no JSON object or array found in {} characters of text",
            text.len()
        ))
    })
}

/// Extract JSON or fall back to `default`.
pub fn parse_json_loosely(text: &str, default: Value) -> Value {
    find_json(text).unwrap_or(default)
}

fn find_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(re) = FENCED_BLOCK.as_ref() {
        for caps in re.captures_iter(text) {
            let Some(inner) = caps.get(1) else { continue };
            if let Ok(value) = serde_json::from_str::<Value>(inner.as_str().trim()) {
                return Some(value);
            }
        }
    }

    let slice = balanced_json_slice(text)?;
    serde_json::from_str(slice)
        .or_else(|_| serde_json::from_str(&strip_trailing_commas(slice)))
        .ok()
}

/// First balanced `{...}` or `[...]` span, skipping brackets inside string
/// literals. A span that closes with the wrong bracket is abandoned and the
/// scan restarts after its opening position.
pub(crate) fn balanced_json_slice(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = bytes[search_from..]
        .iter()
        .position(|b| *b == b'{' || *b == b'[')
    {
        let start = search_from + offset;
        let mut stack = Vec::new();
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => stack.push(b'}'),
                b'[' => stack.push(b']'),
                b'}' | b']' => {
                    if stack.pop() != Some(b) {
                        break;
                    }
                    if stack.is_empty() {
                        return text.get(start..=i);
                    }
                }
                _ => {}
            }
        }
        search_from = start + 1;
    }
    None
}

/// Drop commas that directly precede `}` or `]`, outside string literals.
pub(crate) fn strip_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        }
        if c == ',' {
            let rest = chars.clone().find(|n| !n.is_whitespace());
            if matches!(rest, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Check `instance` against `schema`. Non-object schemas accept anything.
pub fn validate_value(instance: &Value, schema: &Value) -> Result<(), LlmError> {
    if !schema.is_object() {
        return Ok(());
    }
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| LlmError::ConfigurationError(format!("invalid JSON Schema: {e}")))?;

    let messages: Vec<String> = validator
        .iter_errors(instance)
        .take(MAX_REPORTED_ERRORS)
        .map(|err| format!("{} at {}", err, err.instance_path))
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(LlmError::SchemaValidation(messages.join("; ")))
    }
}

/// A type that can describe itself as a JSON Schema.
pub trait StructuredOutput: DeserializeOwned {
    /// Schema the model output must satisfy.
    fn json_schema() -> Value;

    /// Name used in provider `response_format` hints.
    fn schema_name() -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }
}

/// Validate `value` against `T`'s schema, then deserialize it.
pub fn validate<T: StructuredOutput>(value: Value) -> Result<T, LlmError> {
    validate_value(&value, &T::json_schema())?;
    serde_json::from_value(value)
        .map_err(|e| LlmError::SchemaValidation(format!("failed to deserialize: {e}")))
}

/// Extract JSON from `text` and validate it as `T`.
pub fn parse_text<T: StructuredOutput>(text: &str) -> Result<T, LlmError> {
    validate(extract_json(text)?)
}
