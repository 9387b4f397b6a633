use indexmap::IndexMap;
use tracing::debug;

use crate::message::{ToolCall, ToolResult};

/// A started tool call and its result, once observed.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallState {
    pub tool_call: ToolCall,
    pub result: Option<ToolResult>,
}

/// Accumulates streamed tool calls and pairs them with their results.
///
/// Calls are kept in start order; that order is the emission order of the
/// resulting tool messages.
#[derive(Clone, Debug, Default)]
pub struct ToolCallTracker {
    calls: IndexMap<String, ToolCallState>,
    last_started: Option<String>,
}

impl ToolCallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a newly started call and makes it the target of id-less deltas.
    pub fn start(&mut self, call: ToolCall) {
        let id = call.id.clone();
        self.calls.insert(
            id.clone(),
            ToolCallState {
                tool_call: call,
                result: None,
            },
        );
        self.last_started = Some(id);
    }

    /// Appends an argument chunk to `id`, or to the last started call when
    /// `id` is `None`. Returns `false` if there is no call to target.
    pub fn apply_delta(&mut self, id: Option<&str>, chunk: &str) -> bool {
        let Some(target) = id.or(self.last_started.as_deref()) else {
            debug!("argument delta before any tool call started; dropping");
            return false;
        };
        match self.calls.get_mut(target) {
            Some(state) => {
                state.tool_call.append_arguments(chunk);
                true
            }
            None => {
                debug!(tool_call_id = %target, "argument delta for unknown tool call; dropping");
                false
            }
        }
    }

    /// Attaches a result to its call. Results for unknown ids are dropped.
    pub fn attach_result(&mut self, result: ToolResult) -> bool {
        match self.calls.get_mut(&result.tool_call_id) {
            Some(state) => {
                state.result = Some(result);
                true
            }
            None => {
                debug!(tool_call_id = %result.tool_call_id, "result for unknown tool call; dropping");
                false
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&ToolCallState> {
        self.calls.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Takes every tracked call in start order and resets the tracker.
    pub fn drain(&mut self) -> Vec<ToolCallState> {
        self.last_started = None;
        self.calls.drain(..).map(|(_, state)| state).collect()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
        self.last_started = None;
    }
}
