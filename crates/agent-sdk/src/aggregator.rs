//! Folds the raw event stream into aggregated messages.
//!
//! Two output modes share the same merge and tracking logic:
//!
//! - [`OutputMode::Full`] emits one assistant message per step (content plus
//!   every tool call that started) followed by one tool message per call that
//!   received a result.
//! - [`OutputMode::FinalOnly`] ignores tool traffic, discards content at every
//!   step boundary, and emits only the text left when the stream ends.

use tracing::debug;

use crate::content::{Content, ContentPart, extract_text, merge_content};
use crate::message::Message;
use crate::tracker::ToolCallTracker;
use crate::wire::Event;

/// Aggregation policy, fixed for the lifetime of an aggregator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Every step and every tool result.
    #[default]
    Full,
    /// Only the final step's text.
    FinalOnly,
}

/// Stateful fold from [`Event`]s to [`Message`]s.
///
/// Call [`feed`](Self::feed) for every event in arrival order and
/// [`flush`](Self::flush) once the source stream ends.
#[derive(Debug)]
pub struct MessageAggregator {
    mode: OutputMode,
    content: Vec<ContentPart>,
    tool_calls: ToolCallTracker,
}

impl MessageAggregator {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            content: Vec::new(),
            tool_calls: ToolCallTracker::new(),
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// `true` when nothing is buffered for the current step.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.tool_calls.is_empty()
    }

    /// Folds one event and returns the messages completed by it.
    pub fn feed(&mut self, event: Event) -> Vec<Message> {
        let full = self.mode == OutputMode::Full;
        match event {
            Event::StepBegin(_) | Event::StepInterrupted => {
                if full {
                    return self.flush_full();
                }
                self.reset();
            }
            Event::ContentPart(part) => merge_content(&mut self.content, part),
            Event::ToolCall(call) if full => self.tool_calls.start(call),
            Event::ToolCallPart(part) if full => {
                if let Some(chunk) = part.arguments_part {
                    self.tool_calls.apply_delta(part.id.as_deref(), &chunk);
                }
            }
            Event::ToolResult(result) if full => {
                self.tool_calls.attach_result(result);
            }
            _ => {}
        }
        Vec::new()
    }

    /// Emits whatever the current step holds. Call once when the source
    /// stream is exhausted.
    pub fn flush(&mut self) -> Vec<Message> {
        match self.mode {
            OutputMode::Full => self.flush_full(),
            OutputMode::FinalOnly => self.flush_final_only(),
        }
    }

    fn flush_full(&mut self) -> Vec<Message> {
        if self.is_empty() {
            return Vec::new();
        }
        let content = std::mem::take(&mut self.content);
        let states = self.tool_calls.drain();

        let mut tool_calls = Vec::with_capacity(states.len());
        let mut results = Vec::new();
        for state in states {
            if let Some(result) = state.result {
                results.push(result);
            }
            tool_calls.push(state.tool_call);
        }

        let mut messages = Vec::with_capacity(1 + results.len());
        messages.push(Message::assistant(Content::Parts(content), tool_calls));
        messages.extend(results.iter().map(Message::from_tool_result));
        debug!(messages = messages.len(), "flushed step");
        messages
    }

    fn flush_final_only(&mut self) -> Vec<Message> {
        if self.content.is_empty() {
            return Vec::new();
        }
        let text = extract_text(&self.content);
        self.reset();
        if text.trim().is_empty() {
            return Vec::new();
        }
        vec![Message::assistant(Content::Text(text), Vec::new())]
    }

    fn reset(&mut self) {
        self.content.clear();
        self.tool_calls.clear();
    }
}

impl Default for MessageAggregator {
    fn default() -> Self {
        Self::new(OutputMode::default())
    }
}
