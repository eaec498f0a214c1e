//! Round accumulator
//!
//! Collects the deltas of one streamed round: text and reasoning are appended
//! as they arrive, tool-call fragments are grouped by their positional index.
//! At round end the fragments are assembled into complete [`ToolCall`]s; the
//! argument text of each is the concatenation of its fragments in arrival
//! order. Whether that text is valid JSON is checked when the tool runs.
//!
//! Inline `<think>` and `<function-call>` blocks are held back from the
//! forwarded text while they stream in, and lifted into reasoning and tool
//! calls when the round is assembled.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::standards::generate_call_id;
use crate::transformers::{NormalizedResponse, StreamDelta};
use crate::types::{FinishReason, ToolCall};
use crate::utils::{extract_function_calls, split_reasoning};

/// Inline blocks hidden from forwarded text, as (open, close) pairs.
const INLINE_BLOCKS: [(&str, &str); 2] = [
    ("<think>", "</think>"),
    ("<function-call>", "</function-call>"),
];

#[derive(Debug, Default, Clone)]
struct ToolCallBuilder {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// What the caller should do with a processed delta.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessedDelta {
    /// Answer text to forward to the consumer.
    Text(String),
    /// Reasoning text; kept, not forwarded as answer text.
    Reasoning(String),
    /// Absorbed into round state.
    Absorbed,
    /// The engine finished the stream for this round.
    Done,
}

/// Accumulates one streamed round.
#[derive(Debug, Default, Clone)]
pub struct RoundAccumulator {
    text: String,
    /// Text not yet forwarded: a possible tag prefix or an open inline block.
    held: String,
    /// Closing tag of the inline block currently being held.
    inside: Option<&'static str>,
    reasoning: String,
    fragments: BTreeMap<usize, ToolCallBuilder>,
    complete_calls: Vec<ToolCall>,
    finish_reason: Option<FinishReason>,
    content_ended: bool,
    done: bool,
}

impl RoundAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta into the round.
    pub fn process(&mut self, delta: StreamDelta) -> ProcessedDelta {
        match delta {
            StreamDelta::Text(text) => {
                self.text.push_str(&text);
                self.held.push_str(&text);
                ProcessedDelta::Text(self.release_text())
            }
            StreamDelta::Reasoning(text) => {
                self.reasoning.push_str(&text);
                ProcessedDelta::Reasoning(text)
            }
            StreamDelta::ToolCallFragment {
                index,
                id,
                name,
                arguments,
            } => {
                self.process_fragment(index, id, name, arguments);
                ProcessedDelta::Absorbed
            }
            StreamDelta::ToolCall(call) => {
                self.complete_calls.push(call);
                ProcessedDelta::Absorbed
            }
            StreamDelta::Finish(reason) => {
                self.finish_reason = Some(reason);
                self.content_ended = true;
                ProcessedDelta::Absorbed
            }
            StreamDelta::RoundEnd => {
                self.content_ended = true;
                ProcessedDelta::Absorbed
            }
            StreamDelta::Done => {
                self.done = true;
                ProcessedDelta::Done
            }
        }
    }

    /// Forwardable prefix of the held text. Stops at an inline block that
    /// has not closed yet and keeps any trailing partial opening tag.
    fn release_text(&mut self) -> String {
        let mut visible = String::new();
        loop {
            if let Some(close) = self.inside {
                let Some(end) = self.held.find(close) else {
                    return visible;
                };
                self.held.drain(..end + close.len());
                self.inside = None;
                continue;
            }

            let next = INLINE_BLOCKS
                .iter()
                .filter_map(|(open, close)| self.held.find(open).map(|at| (at, *close)))
                .min_by_key(|(at, _)| *at);
            match next {
                Some((at, close)) => {
                    visible.extend(self.held.drain(..at));
                    self.inside = Some(close);
                }
                None => {
                    let keep = partial_tag_len(&self.held);
                    let split = self.held.len() - keep;
                    visible.extend(self.held.drain(..split));
                    return visible;
                }
            }
        }
    }

    /// Text held back at stream end: a partial tag that never completed or
    /// an inline block that never closed. Both stay part of the answer.
    pub fn take_held_text(&mut self) -> String {
        self.inside = None;
        std::mem::take(&mut self.held)
    }

    fn process_fragment(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) {
        let builder = self.fragments.entry(index).or_default();
        if builder.id.is_none() {
            builder.id = id.filter(|s| !s.is_empty());
        }
        if let Some(name) = name.filter(|s| !s.is_empty()) {
            match &builder.name {
                None => builder.name = Some(name),
                Some(existing) if *existing != name => {
                    tracing::warn!(
                        index,
                        existing = %existing,
                        ignored = %name,
                        "tool call name repeated with a different value"
                    );
                }
                Some(_) => {}
            }
        }
        if let Some(arguments) = arguments {
            builder.arguments.push_str(&arguments);
        }
    }

    /// Provider signalled the end of its content (finish reason or stop event).
    pub fn content_ended(&self) -> bool {
        self.content_ended
    }

    /// The engine sentinel was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of tool calls seen so far (fragment groups plus whole calls).
    pub fn tool_call_count(&self) -> usize {
        self.fragments.len() + self.complete_calls.len()
    }

    /// Assemble the round. Fragment groups come first in index order,
    /// followed by calls delivered whole, then calls lifted from inline
    /// `<function-call>` blocks.
    pub fn finish(self) -> NormalizedResponse {
        let mut tool_calls = Vec::with_capacity(self.tool_call_count());
        for (index, builder) in self.fragments {
            let Some(name) = builder.name else {
                tracing::warn!(index, "dropping streamed tool call without a name");
                continue;
            };
            let id = builder.id.unwrap_or_else(generate_call_id);
            tool_calls.push(ToolCall::function(id, name, builder.arguments));
        }
        tool_calls.extend(self.complete_calls);

        let (think, text) = split_reasoning(&self.text);
        let (text, inline_calls) = extract_function_calls(&text);
        tool_calls.extend(inline_calls);
        let reasoning = match think {
            Some(think) if self.reasoning.is_empty() => Some(think),
            Some(think) => Some(format!("{}\n{think}", self.reasoning)),
            None => (!self.reasoning.is_empty()).then_some(self.reasoning),
        };

        NormalizedResponse {
            text,
            reasoning,
            tool_calls,
            finish_reason: self.finish_reason,
            raw: Value::Null,
        }
    }
}

/// Length of the longest suffix of `text` that starts an opening tag.
fn partial_tag_len(text: &str) -> usize {
    INLINE_BLOCKS
        .iter()
        .filter_map(|(open, _)| (1..open.len()).rev().find(|&len| text.ends_with(&open[..len])))
        .max()
        .unwrap_or(0)
}
