//! Raw events produced by the agent run loop.
//!
//! On the wire every event is an envelope `{"type": <kind>, "payload": {...}}`.
//! Kinds this SDK does not know decode to [`Event::Unknown`] and are passed
//! through untouched.

use serde::de::DeserializeOwned;

use crate::approval::{ApprovalRequest, ApprovalResponse};
use crate::content::{Content, ContentPart};
use crate::message::{ToolCall, ToolResult};

/// Token accounting reported by the run loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_other: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub input_cache_read: u64,
    #[serde(default)]
    pub input_cache_creation: u64,
}

impl TokenUsage {
    pub fn total_input(&self) -> u64 {
        self.input_other + self.input_cache_read + self.input_cache_creation
    }

    pub fn total(&self) -> u64 {
        self.total_input() + self.output
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_other += rhs.input_other;
        self.output += rhs.output;
        self.input_cache_read += rhs.input_cache_read;
        self.input_cache_creation += rhs.input_cache_creation;
    }
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StatusUpdate {
    /// Fraction of the context window in use, `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Point-in-time view of a run loop, returned by `status()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StatusSnapshot {
    /// Fraction of the context window in use, `0.0..=1.0`.
    #[serde(default)]
    pub context_usage: f64,
    /// Whether the run loop auto-approves gated actions.
    #[serde(default)]
    pub yolo_enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TurnBegin {
    pub user_input: Content,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StepBegin {
    pub n: u32,
}

/// Streamed chunk of a tool call's argument payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallPart {
    /// Target call. `None` means the most recently started call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments_part: Option<String>,
}

impl ToolCallPart {
    /// Chunk for the most recently started call.
    pub fn new(arguments_part: impl Into<String>) -> Self {
        Self {
            id: None,
            arguments_part: Some(arguments_part.into()),
        }
    }

    /// Chunk for a specific call.
    pub fn for_call(id: impl Into<String>, arguments_part: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            arguments_part: Some(arguments_part.into()),
        }
    }
}

/// Event emitted by a subagent, tagged with the task tool call that spawned it.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SubagentEvent {
    pub task_tool_call_id: String,
    pub event: Box<Event>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ApprovalRequestResolved {
    pub request_id: String,
    pub response: ApprovalResponse,
}

/// One item of the low-level streaming protocol.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    TurnBegin(TurnBegin),
    /// Step boundary: a new step starts.
    StepBegin(StepBegin),
    /// Step boundary: the current step was cut short.
    StepInterrupted,
    CompactionBegin,
    CompactionEnd,
    StatusUpdate(StatusUpdate),
    ContentPart(ContentPart),
    /// A tool call starts (name plus initial arguments).
    ToolCall(ToolCall),
    /// Argument chunk for a started tool call.
    ToolCallPart(ToolCallPart),
    ToolResult(ToolResult),
    SubagentEvent(SubagentEvent),
    /// Gated action; must be resolved before the producer continues.
    ApprovalRequest(ApprovalRequest),
    ApprovalRequestResolved(ApprovalRequestResolved),
    /// Event kind unknown to this SDK version.
    Unknown {
        kind: String,
        payload: serde_json::Value,
    },
}

impl Event {
    /// Returns the wire name of the event kind.
    pub fn kind(&self) -> &str {
        match self {
            Self::TurnBegin(_) => "TurnBegin",
            Self::StepBegin(_) => "StepBegin",
            Self::StepInterrupted => "StepInterrupted",
            Self::CompactionBegin => "CompactionBegin",
            Self::CompactionEnd => "CompactionEnd",
            Self::StatusUpdate(_) => "StatusUpdate",
            Self::ContentPart(_) => "ContentPart",
            Self::ToolCall(_) => "ToolCall",
            Self::ToolCallPart(_) => "ToolCallPart",
            Self::ToolResult(_) => "ToolResult",
            Self::SubagentEvent(_) => "SubagentEvent",
            Self::ApprovalRequest(_) => "ApprovalRequest",
            Self::ApprovalRequestResolved(_) => "ApprovalRequestResolved",
            Self::Unknown { kind, .. } => kind,
        }
    }

    /// `true` for `StepBegin` and `StepInterrupted`.
    pub fn is_step_boundary(&self) -> bool {
        matches!(self, Self::StepBegin(_) | Self::StepInterrupted)
    }

    /// Decodes an event from its envelope parts.
    pub fn from_envelope(envelope: EventEnvelope) -> Result<Self, serde_json::Error> {
        let EventEnvelope { kind, payload } = envelope;
        let event = match kind.as_str() {
            "TurnBegin" => Self::TurnBegin(decode(payload)?),
            "StepBegin" => Self::StepBegin(decode(payload)?),
            "StepInterrupted" => Self::StepInterrupted,
            "CompactionBegin" => Self::CompactionBegin,
            "CompactionEnd" => Self::CompactionEnd,
            "StatusUpdate" => Self::StatusUpdate(decode(payload)?),
            "ContentPart" => Self::ContentPart(decode(payload)?),
            "ToolCall" => Self::ToolCall(decode(payload)?),
            "ToolCallPart" => Self::ToolCallPart(decode(payload)?),
            "ToolResult" => Self::ToolResult(decode(payload)?),
            "SubagentEvent" => Self::SubagentEvent(decode(payload)?),
            "ApprovalRequest" => Self::ApprovalRequest(decode(payload)?),
            "ApprovalRequestResolved" => Self::ApprovalRequestResolved(decode(payload)?),
            _ => Self::Unknown {
                kind: kind.clone(),
                payload,
            },
        };
        Ok(event)
    }

    /// Encodes the event into its envelope parts.
    pub fn to_envelope(&self) -> Result<EventEnvelope, serde_json::Error> {
        let payload = match self {
            Self::TurnBegin(value) => serde_json::to_value(value)?,
            Self::StepBegin(value) => serde_json::to_value(value)?,
            Self::StepInterrupted | Self::CompactionBegin | Self::CompactionEnd => {
                serde_json::Value::Object(serde_json::Map::new())
            }
            Self::StatusUpdate(value) => serde_json::to_value(value)?,
            Self::ContentPart(value) => serde_json::to_value(value)?,
            Self::ToolCall(value) => serde_json::to_value(value)?,
            Self::ToolCallPart(value) => serde_json::to_value(value)?,
            Self::ToolResult(value) => serde_json::to_value(value)?,
            Self::SubagentEvent(value) => serde_json::to_value(value)?,
            Self::ApprovalRequest(value) => serde_json::to_value(value)?,
            Self::ApprovalRequestResolved(value) => serde_json::to_value(value)?,
            Self::Unknown { payload, .. } => payload.clone(),
        };
        Ok(EventEnvelope {
            kind: self.kind().to_string(),
            payload,
        })
    }
}

fn decode<T: DeserializeOwned>(payload: serde_json::Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(payload)
}

/// Wire envelope of an event.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl serde::Serialize for Event {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let envelope = self.to_envelope().map_err(serde::ser::Error::custom)?;
        envelope.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Event {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let envelope = EventEnvelope::deserialize(deserializer)?;
        Event::from_envelope(envelope).map_err(serde::de::Error::custom)
    }
}

impl From<ContentPart> for Event {
    fn from(value: ContentPart) -> Self {
        Self::ContentPart(value)
    }
}

impl From<ToolCall> for Event {
    fn from(value: ToolCall) -> Self {
        Self::ToolCall(value)
    }
}

impl From<ToolCallPart> for Event {
    fn from(value: ToolCallPart) -> Self {
        Self::ToolCallPart(value)
    }
}

impl From<ToolResult> for Event {
    fn from(value: ToolResult) -> Self {
        Self::ToolResult(value)
    }
}

impl From<ApprovalRequest> for Event {
    fn from(value: ApprovalRequest) -> Self {
        Self::ApprovalRequest(value)
    }
}
