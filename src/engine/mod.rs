//! Dispatch engines
//!
//! The orchestrator talks to an engine through a small polling contract:
//! submit a serialized request, then poll for either one response string or a
//! sequence of stream chunks terminated by [`DONE`]. Submission never blocks
//! and polling never waits; the caller owns the backoff between polls.
//!
//! Headers, the endpoint path and the request id travel inside the submitted
//! JSON under the reserved keys of [`crate::transformers::WireRequest`].
//! Output is keyed by that id, so concurrent callers sharing one engine each
//! poll only their own results, and a caller that gives up on a request
//! discards whatever it would still produce.

mod http;
mod outbox;
mod scripted;

use std::time::Duration;

use crate::error::LlmError;
use crate::provider::ProviderKind;
use crate::retry::RetryPolicy;

pub use http::HttpEngine;
pub use scripted::ScriptedEngine;

/// End-of-stream sentinel returned by [`DispatchEngine::poll_stream_chunk`].
pub const DONE: &str = "[DONE]";

/// Non-blocking request dispatcher.
pub trait DispatchEngine: Send + Sync {
    /// Queue a serialized request.
    fn submit(&self, payload: String) -> Result<(), LlmError>;

    /// Next complete response of any request, or `None` when nothing is
    /// ready yet.
    fn poll_response(&self) -> Option<String>;

    /// Next stream chunk of any request, or `None` when nothing is ready
    /// yet. Every stream ends with [`DONE`].
    fn poll_stream_chunk(&self) -> Option<String>;

    /// Response of the request submitted with `request_id`.
    fn poll_response_for(&self, request_id: &str) -> Option<String>;

    /// Next stream chunk of the request submitted with `request_id`.
    fn poll_stream_chunk_for(&self, request_id: &str) -> Option<String>;

    /// Drop queued and future output of `request_id`.
    fn discard(&self, request_id: &str);

    /// No submissions in flight and nothing left to poll.
    fn is_idle(&self) -> bool;

    /// Update the read-buffer size used for later requests.
    fn set_buffer_size(&self, _size: usize) {}
}

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Worker count; also the number of requests served in parallel.
    pub max_concurrent: usize,
    pub provider: ProviderKind,
    pub model: String,
    /// Emit per-request debug events.
    pub debug: bool,
    pub base_url: String,
    /// Initial read-buffer capacity in bytes.
    pub buffer_size: usize,
    pub retry: RetryPolicy,
    /// Per-attempt HTTP timeout.
    pub timeout: Option<Duration>,
}

impl EngineOptions {
    pub fn new(provider: ProviderKind, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            max_concurrent: 10,
            provider,
            model: model.into(),
            debug: false,
            base_url: base_url.into(),
            buffer_size: crate::buffer::dynamic::DEFAULT_INITIAL_SIZE,
            retry: RetryPolicy::default(),
            timeout: None,
        }
    }

    pub const fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub const fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}
