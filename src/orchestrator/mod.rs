//! Tool-calling orchestrator
//!
//! Runs the automatic function-calling loop on top of a [`DispatchEngine`]:
//! submit the conversation, drain and normalize the engine output, execute
//! any requested tools, append their results, and resubmit until the model
//! answers with plain content. Streaming and non-streaming share the loop;
//! only the way one round's output is collected differs.
//!
//! Every round polls the engine for its own request id only. A round that
//! ends without its output (timeout, or the caller dropping the future or
//! stream) discards that id, so late output never answers a later request.
//!
//! Tool failures never abort the loop. An unknown tool, malformed arguments,
//! arguments rejected by the tool's schema, or a failing handler all become
//! an `"Error: ..."` tool message that the model sees on the next round.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::Stream;
use tokio::time::Instant;

use crate::buffer::{BufferDecision, BufferStrategy};
use crate::engine::DispatchEngine;
use crate::error::LlmError;
use crate::streaming::{ProcessedDelta, RoundAccumulator};
use crate::structured_output::validate_value;
use crate::tools::{SharedToolRegistry, ToolRegistry};
use crate::transformers::{NormalizedResponse, RequestBuilder, StreamNormalizer, normalize_response};
use crate::types::{ChatMessage, CompletionRequest, CompletionResult, FinishReason, ToolCall};

/// Lazily produced answer text of a streamed completion.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Default delay between empty polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Where the loop is within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    AwaitingResponse,
    ToolCallsDetected,
    Executing,
    ContentTerminal,
}

/// Result of a single round.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// 1-based round number.
    pub round: usize,
    /// Tool calls requested by the model in this round.
    pub tool_calls: Vec<ToolCall>,
    /// Messages contributed in this round (assistant + tool outputs).
    pub messages: Vec<ChatMessage>,
    pub finish_reason: Option<FinishReason>,
}

/// Loop configuration.
#[derive(Clone)]
pub struct OrchestratorOptions {
    /// Cap on engine submissions per completion. `None` is unbounded.
    pub max_rounds: Option<usize>,
    /// Per-round limit on waiting for engine output. `None` waits forever.
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
    /// Called after every round.
    pub on_step_finish: Option<Arc<dyn Fn(&StepResult) + Send + Sync>>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_rounds: None,
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            on_step_finish: None,
        }
    }
}

impl std::fmt::Debug for OrchestratorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorOptions")
            .field("max_rounds", &self.max_rounds)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .field("on_step_finish", &self.on_step_finish.is_some())
            .finish()
    }
}

impl OrchestratorOptions {
    pub const fn with_max_rounds(mut self, max_rounds: Option<usize>) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn on_step_finish(mut self, callback: impl Fn(&StepResult) + Send + Sync + 'static) -> Self {
        self.on_step_finish = Some(Arc::new(callback));
        self
    }
}

/// Drives completions through an engine. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<dyn DispatchEngine>,
    builder: RequestBuilder,
    tools: SharedToolRegistry,
    buffer: Arc<Mutex<Box<dyn BufferStrategy>>>,
    options: OrchestratorOptions,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("builder", &self.builder)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn DispatchEngine>,
        builder: RequestBuilder,
        tools: SharedToolRegistry,
        buffer: Box<dyn BufferStrategy>,
        options: OrchestratorOptions,
    ) -> Self {
        engine.set_buffer_size(buffer.decision().size);
        Self {
            engine,
            builder,
            tools,
            buffer: Arc::new(Mutex::new(buffer)),
            options,
        }
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub fn tools(&self) -> &SharedToolRegistry {
        &self.tools
    }

    /// Current buffer recommendation.
    pub fn buffer_decision(&self) -> BufferDecision {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).decision()
    }

    /// Run a non-streaming completion to its terminal round.
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult, LlmError> {
        let mut request = request;
        request.stream = false;
        let mut messages = request.input.to_messages()?;
        let mut round = 0usize;

        loop {
            self.ensure_round_available(round)?;
            let registry = self.tools.snapshot();
            let pending = self.submit(&request, &messages, &registry)?;
            round += 1;
            trace_state(round, RoundState::AwaitingResponse);

            let body = self.await_response(pending).await?;
            let response = normalize_response(&body);
            self.observe(body.len(), response.raw.get("error").is_some());

            let state = Self::classify(&response);
            tracing::debug!(
                round,
                ?state,
                tool_calls = response.tool_calls.len(),
                "round complete"
            );
            if state == RoundState::ContentTerminal {
                self.finish_step(round, &response, Vec::new());
                return Ok(response.into_result());
            }

            self.ensure_round_available(round)?;
            let added = self.execute_tools(&registry, &mut messages, &response).await;
            self.finish_step(round, &response, added);
        }
    }

    /// Run a streaming completion. Answer text of every round is yielded as
    /// it arrives; tool rounds are executed between streams.
    pub fn stream(&self, request: CompletionRequest) -> TextStream {
        let this = self.clone();
        let out = async_stream::stream! {
            let mut request = request;
            request.stream = true;
            let mut messages = match request.input.to_messages() {
                Ok(messages) => messages,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let normalizer = StreamNormalizer::new();
            let mut round = 0usize;

            loop {
                if let Err(e) = this.ensure_round_available(round) {
                    yield Err(e);
                    return;
                }
                let registry = this.tools.snapshot();
                let mut pending = match this.submit(&request, &messages, &registry) {
                    Ok(pending) => pending,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                round += 1;
                trace_state(round, RoundState::AwaitingResponse);

                let deadline = this.deadline();
                let mut accumulator = RoundAccumulator::new();
                let mut received = 0usize;
                while !accumulator.is_done() {
                    let Some(chunk) = this.engine.poll_stream_chunk_for(pending.request_id()) else {
                        if let Err(e) = this.check_deadline(deadline) {
                            yield Err(e);
                            return;
                        }
                        tokio::time::sleep(this.options.poll_interval).await;
                        continue;
                    };
                    received += chunk.len();
                    for delta in normalizer.normalize_chunk(&chunk) {
                        if let ProcessedDelta::Text(text) = accumulator.process(delta)
                            && !text.is_empty()
                        {
                            yield Ok(text);
                        }
                    }
                }
                pending.settle();
                let held = accumulator.take_held_text();
                if !held.is_empty() {
                    yield Ok(held);
                }

                let response = accumulator.finish();
                this.observe(received, false);
                let state = Orchestrator::classify(&response);
                tracing::debug!(
                    round,
                    ?state,
                    tool_calls = response.tool_calls.len(),
                    "stream round complete"
                );
                if state == RoundState::ContentTerminal {
                    this.finish_step(round, &response, Vec::new());
                    return;
                }

                if let Err(e) = this.ensure_round_available(round) {
                    yield Err(e);
                    return;
                }
                let added = this.execute_tools(&registry, &mut messages, &response).await;
                this.finish_step(round, &response, added);
            }
        };
        Box::pin(out)
    }

    fn classify(response: &NormalizedResponse) -> RoundState {
        if response.has_tool_calls() {
            RoundState::ToolCallsDetected
        } else {
            RoundState::ContentTerminal
        }
    }

    fn submit(
        &self,
        request: &CompletionRequest,
        messages: &[ChatMessage],
        registry: &ToolRegistry,
    ) -> Result<PendingRound, LlmError> {
        let wire = self.builder.build_with_messages(request, messages, registry)?;
        let request_id = wire.request_id.clone();
        self.engine.submit(wire.into_engine_payload().to_string())?;
        Ok(PendingRound {
            engine: Arc::clone(&self.engine),
            request_id,
            settled: false,
        })
    }

    fn ensure_round_available(&self, completed: usize) -> Result<(), LlmError> {
        match self.options.max_rounds {
            Some(max) if completed >= max => {
                tracing::warn!(max_rounds = max, "tool-calling loop hit its round cap");
                Err(LlmError::MaxRoundsExceeded(max))
            }
            _ => Ok(()),
        }
    }

    fn deadline(&self) -> Option<(Duration, Instant)> {
        self.options
            .timeout
            .map(|timeout| (timeout, Instant::now() + timeout))
    }

    fn check_deadline(&self, deadline: Option<(Duration, Instant)>) -> Result<(), LlmError> {
        match deadline {
            Some((timeout, at)) if Instant::now() >= at => Err(LlmError::Timeout(timeout)),
            _ => Ok(()),
        }
    }

    async fn await_response(&self, mut pending: PendingRound) -> Result<String, LlmError> {
        let deadline = self.deadline();
        loop {
            if let Some(body) = self.engine.poll_response_for(pending.request_id()) {
                pending.settle();
                return Ok(body);
            }
            self.check_deadline(deadline)?;
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    fn observe(&self, size: usize, failed: bool) {
        let decision = self
            .buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .observe(size, failed);
        self.engine.set_buffer_size(decision.size);
        tracing::trace!(observed = size, buffer = decision.size, source = ?decision.source, "buffer updated");
    }

    /// Append the assistant turn and one tool message per call. Returns the
    /// appended messages.
    async fn execute_tools(
        &self,
        registry: &ToolRegistry,
        messages: &mut Vec<ChatMessage>,
        response: &NormalizedResponse,
    ) -> Vec<ChatMessage> {
        let start = messages.len();
        tracing::trace!(
            state = ?RoundState::Executing,
            tools = response.tool_calls.len(),
            "executing tool calls"
        );
        messages.push(
            ChatMessage::assistant(response.text.clone())
                .with_tool_calls(response.tool_calls.clone()),
        );

        for call in &response.tool_calls {
            let content = match run_tool(registry, call).await {
                Ok(output) => output,
                Err(error) => {
                    tracing::warn!(tool = call.name(), id = %call.id, %error, "tool call failed");
                    format!("Error: {error}")
                }
            };
            messages.push(ChatMessage::tool(content, call.id.clone(), call.name()));
        }
        messages[start..].to_vec()
    }

    fn finish_step(&self, round: usize, response: &NormalizedResponse, messages: Vec<ChatMessage>) {
        if let Some(callback) = &self.options.on_step_finish {
            callback(&StepResult {
                round,
                tool_calls: response.tool_calls.clone(),
                messages,
                finish_reason: response.finish_reason.clone(),
            });
        }
    }
}

/// A submitted round whose output has not fully arrived. Dropping it
/// unsettled discards the request's engine output.
struct PendingRound {
    engine: Arc<dyn DispatchEngine>,
    request_id: String,
    settled: bool,
}

impl PendingRound {
    fn request_id(&self) -> &str {
        &self.request_id
    }

    /// All output for this request was received.
    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for PendingRound {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(request_id = %self.request_id, "abandoning round output");
            self.engine.discard(&self.request_id);
        }
    }
}

fn trace_state(round: usize, state: RoundState) {
    tracing::trace!(round, ?state, "orchestrator state");
}

/// Execute one call after checking its arguments against the tool's schema.
async fn run_tool(registry: &ToolRegistry, call: &ToolCall) -> Result<String, LlmError> {
    let tool = registry
        .get(call.name())
        .ok_or_else(|| LlmError::ToolNotFound(call.name().to_string()))?;
    let arguments = call.parsed_arguments()?;
    validate_value(&arguments, &tool.spec.parameters).map_err(|e| {
        LlmError::InvalidToolArguments {
            name: call.name().to_string(),
            reason: e.to_string(),
        }
    })?;
    registry.execute(call).await
}
