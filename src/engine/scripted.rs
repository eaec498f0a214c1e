//! In-process engine that replays scripted output.
//!
//! Each submission consumes the next scripted reply of the matching kind:
//! a whole response body for non-streaming requests, a chunk sequence for
//! streaming ones. Output is keyed by the submission's request id like any
//! other engine. Every payload is recorded so callers can assert on what
//! would have gone over the wire.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value;

use super::outbox::Outbox;
use super::{DONE, DispatchEngine};
use crate::error::LlmError;
use crate::transformers::WireRequest;

#[derive(Debug, Default)]
struct State {
    responses: VecDeque<String>,
    streams: VecDeque<Vec<String>>,
    ready_responses: Outbox,
    ready_chunks: Outbox,
    submissions: Vec<String>,
    discarded: Vec<String>,
    pending_polls: usize,
    countdown: usize,
    buffer_sizes: Vec<usize>,
}

impl State {
    /// Simulated latency: `pending_polls` empty polls before each item.
    fn ready(&mut self) -> bool {
        if self.countdown > 0 {
            self.countdown -= 1;
            return false;
        }
        self.countdown = self.pending_polls;
        true
    }
}

/// Scripted [`DispatchEngine`].
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    state: Mutex<State>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a non-streaming response body.
    pub fn with_response(self, body: impl Into<String>) -> Self {
        self.push_response(body);
        self
    }

    /// Queue a stream; [`DONE`] is appended automatically.
    pub fn with_stream<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_stream(chunks);
        self
    }

    /// Return `None` this many times before every response or chunk.
    pub fn with_pending_polls(self, polls: usize) -> Self {
        {
            let mut state = self.lock();
            state.pending_polls = polls;
            state.countdown = polls;
        }
        self
    }

    pub fn push_response(&self, body: impl Into<String>) {
        self.lock().responses.push_back(body.into());
    }

    pub fn push_stream<I, S>(&self, chunks: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks = chunks.into_iter().map(Into::into).collect();
        self.lock().streams.push_back(chunks);
    }

    /// Raw payloads in submission order.
    pub fn submissions(&self) -> Vec<String> {
        self.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.lock().submissions.len()
    }

    /// Submitted payloads decoded back into wire requests.
    pub fn wire_requests(&self) -> Vec<WireRequest> {
        self.lock()
            .submissions
            .iter()
            .filter_map(|payload| WireRequest::from_engine_payload(payload).ok())
            .collect()
    }

    /// Body of the last submission, reserved keys removed.
    pub fn last_body(&self) -> Option<Value> {
        self.wire_requests().pop().map(|request| request.body)
    }

    /// Request ids passed to [`DispatchEngine::discard`].
    pub fn discarded(&self) -> Vec<String> {
        self.lock().discarded.clone()
    }

    /// Every size passed to [`DispatchEngine::set_buffer_size`].
    pub fn buffer_sizes(&self) -> Vec<usize> {
        self.lock().buffer_sizes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DispatchEngine for ScriptedEngine {
    fn submit(&self, payload: String) -> Result<(), LlmError> {
        let request = WireRequest::from_engine_payload(&payload)?;
        let id = request.request_id.as_str();
        let mut state = self.lock();
        state.submissions.push(payload);

        if request.is_stream() {
            let chunks = state.streams.pop_front().ok_or_else(|| {
                LlmError::EngineError("no scripted stream left".to_string())
            })?;
            for chunk in chunks {
                state.ready_chunks.push(id, chunk);
            }
            state.ready_chunks.push(id, DONE.to_string());
        } else {
            let body = state.responses.pop_front().ok_or_else(|| {
                LlmError::EngineError("no scripted response left".to_string())
            })?;
            state.ready_responses.push(id, body);
        }
        Ok(())
    }

    fn poll_response(&self) -> Option<String> {
        let mut state = self.lock();
        if state.ready_responses.is_empty() || !state.ready() {
            return None;
        }
        state.ready_responses.pop_any()
    }

    fn poll_stream_chunk(&self) -> Option<String> {
        let mut state = self.lock();
        if state.ready_chunks.is_empty() || !state.ready() {
            return None;
        }
        state.ready_chunks.pop_any()
    }

    fn poll_response_for(&self, request_id: &str) -> Option<String> {
        let mut state = self.lock();
        if !state.ready_responses.has_for(request_id) || !state.ready() {
            return None;
        }
        state.ready_responses.pop_for(request_id)
    }

    fn poll_stream_chunk_for(&self, request_id: &str) -> Option<String> {
        let mut state = self.lock();
        if !state.ready_chunks.has_for(request_id) || !state.ready() {
            return None;
        }
        state.ready_chunks.pop_for(request_id)
    }

    fn discard(&self, request_id: &str) {
        let mut state = self.lock();
        state.ready_responses.discard(request_id);
        state.ready_chunks.discard(request_id);
        state.discarded.push(request_id.to_string());
    }

    fn is_idle(&self) -> bool {
        let state = self.lock();
        state.ready_responses.is_empty() && state.ready_chunks.is_empty()
    }

    fn set_buffer_size(&self, size: usize) {
        self.lock().buffer_sizes.push(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(stream: bool) -> String {
        json!({"model": "m", "stream": stream, "_headers": {}, "_endpoint": "chat/completions"})
            .to_string()
    }

    fn payload_with_id(stream: bool, id: &str) -> String {
        json!({"model": "m", "stream": stream, "_request_id": id}).to_string()
    }

    #[test]
    fn replays_responses_in_order() {
        let engine = ScriptedEngine::new().with_response("one").with_response("two");
        engine.submit(payload(false)).unwrap();
        engine.submit(payload(false)).unwrap();
        assert_eq!(engine.poll_response().as_deref(), Some("one"));
        assert_eq!(engine.poll_response().as_deref(), Some("two"));
        assert_eq!(engine.poll_response(), None);
        assert!(engine.is_idle());
        assert_eq!(engine.submission_count(), 2);
    }

    #[test]
    fn streams_end_with_done() {
        let engine = ScriptedEngine::new().with_stream(["a", "b"]);
        engine.submit(payload(true)).unwrap();
        let chunks: Vec<_> = std::iter::from_fn(|| engine.poll_stream_chunk()).collect();
        assert_eq!(chunks, vec!["a", "b", DONE]);
    }

    #[test]
    fn pending_polls_delay_each_item() {
        let engine = ScriptedEngine::new()
            .with_response("late")
            .with_pending_polls(2);
        engine.submit(payload(false)).unwrap();
        assert_eq!(engine.poll_response(), None);
        assert_eq!(engine.poll_response(), None);
        assert_eq!(engine.poll_response().as_deref(), Some("late"));
    }

    #[test]
    fn each_request_sees_only_its_own_output() {
        let engine = ScriptedEngine::new()
            .with_response("first")
            .with_response("second")
            .with_stream(["s1", "s2"]);
        engine.submit(payload_with_id(false, "a")).unwrap();
        engine.submit(payload_with_id(false, "b")).unwrap();
        engine.submit(payload_with_id(true, "c")).unwrap();

        assert_eq!(engine.poll_response_for("b").as_deref(), Some("second"));
        assert_eq!(engine.poll_response_for("b"), None);
        assert_eq!(engine.poll_stream_chunk_for("a"), None);
        assert_eq!(engine.poll_response_for("a").as_deref(), Some("first"));
        let chunks: Vec<_> = std::iter::from_fn(|| engine.poll_stream_chunk_for("c")).collect();
        assert_eq!(chunks, vec!["s1", "s2", DONE]);
        assert!(engine.is_idle());
    }

    #[test]
    fn discarded_output_never_reaches_a_later_request() {
        let engine = ScriptedEngine::new()
            .with_response("stale")
            .with_response("fresh");
        engine.submit(payload_with_id(false, "old")).unwrap();
        engine.discard("old");
        engine.submit(payload_with_id(false, "new")).unwrap();

        assert_eq!(engine.poll_response().as_deref(), Some("fresh"));
        assert_eq!(engine.discarded(), vec!["old"]);
    }

    #[test]
    fn exhausted_script_is_an_engine_error() {
        let engine = ScriptedEngine::new();
        assert!(matches!(
            engine.submit(payload(false)),
            Err(LlmError::EngineError(_))
        ));
        assert!(matches!(
            engine.submit("not json".to_string()),
            Err(LlmError::ParseError(_))
        ));
    }

    #[test]
    fn records_reserved_keys_stripped() {
        let engine = ScriptedEngine::new().with_response("{}");
        engine.submit(payload(false)).unwrap();
        let body = engine.last_body().unwrap();
        assert!(body.get("_headers").is_none());
        assert_eq!(body["model"], "m");
    }
}
