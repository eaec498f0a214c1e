//! # Bhumi - multi-provider LLM client
//!
//! Bhumi sends completion requests to OpenAI-compatible, Anthropic and Gemini
//! endpoints through one canonical request type, runs the automatic
//! function-calling loop for registered tools, and sizes its transport
//! buffers adaptively.
//!
//! ## Layers
//!
//! - [`types`]: canonical messages, requests, tool calls and results.
//! - [`transformers`] and [`standards`]: per-dialect request rendering,
//!   response normalization and stream-chunk conversion.
//! - [`engine`]: the non-blocking dispatch contract plus an HTTP engine and a
//!   scripted engine.
//! - [`orchestrator`]: the tool-calling round loop, streaming and
//!   non-streaming.
//! - [`buffer`]: fixed, reactive and archive-backed buffer sizing, and the
//!   offline evolutionary search that fills the archive.
//! - [`structured_output`]: JSON extraction and schema validation.
//! - [`client`]: [`LlmClient`] and its [`LlmConfig`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bhumi::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), LlmError> {
//!     let client = LlmClient::new(LlmConfig::from_env("openai/gpt-4o-mini")?)?;
//!     let result = client
//!         .completion(CompletionRequest::new(vec![user!("2+2?")]))
//!         .await?;
//!     println!("{}", result.text);
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod buffer;
pub mod client;
pub mod engine;
pub mod error;
pub mod macros;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod standards;
pub mod streaming;
pub mod structured_output;
pub mod telemetry;
pub mod tools;
pub mod transformers;
pub mod types;
pub mod utils;

pub use client::{LlmClient, LlmConfig};
pub use error::LlmError;

/// Commonly used items.
pub mod prelude {
    pub use crate::buffer::{BufferConfig, BufferDecision, BufferSource, BufferStrategy};
    pub use crate::client::{LlmClient, LlmConfig};
    pub use crate::engine::{DispatchEngine, EngineOptions, HttpEngine, ScriptedEngine};
    pub use crate::error::{ErrorCategory, LlmError};
    pub use crate::orchestrator::{OrchestratorOptions, StepResult, TextStream};
    pub use crate::provider::{ModelId, ProviderKind};
    pub use crate::retry::RetryPolicy;
    pub use crate::structured_output::{Extracted, StructuredOutput, extract, parse_json_loosely};
    pub use crate::tools::{SharedToolRegistry, ToolHandler, ToolRegistry};
    pub use crate::types::{
        ChatMessage, CompletionRequest, CompletionResult, ContentPart, MessageContent,
        MessageRole, RequestInput, ToolCall, ToolSpec,
    };
    pub use crate::{assistant, messages, system, tool, user, user_with_image};
}
