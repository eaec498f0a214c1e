//! Provider wire dialects
//!
//! One module per dialect. Each implements request rendering, response
//! normalization and stream-chunk conversion for its provider family.

pub mod anthropic;
pub mod gemini;
pub mod openai;

/// Id for a tool call the provider did not name.
pub(crate) fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}
