//! Line-delimited JSON-RPC 2.0 framing spoken by `kimi --wire`.
//!
//! The client calls `initialize`, `prompt` and `cancel`. The agent sends
//! `event` (stream items) and `request` (approval requests and external tool
//! calls) back on the same pipe; both are answered with a response carrying
//! the same id.

use serde_json::{Value, json};

use crate::approval::{ApprovalRequest, ApprovalResponse};
use crate::errors::RuntimeError;
use crate::message::{FunctionBody, ToolResult};
use crate::tools::ToolDefinition;
use crate::wire::{Event, EventEnvelope};

pub(crate) const PROTOCOL_VERSION: &str = "2";

const METHOD_NOT_FOUND: i64 = -32601;
pub(crate) const INVALID_PARAMS: i64 = -32602;

#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RpcError {
    pub(crate) fn is_method_not_found(&self) -> bool {
        self.code == METHOD_NOT_FOUND
    }

    /// Name of the agent-side error, carried in `data.type`.
    pub(crate) fn kind(&self) -> Option<&str> {
        self.data.as_ref()?.get("type")?.as_str()
    }

    fn data_str(&self, key: &str) -> Option<String> {
        self.data
            .as_ref()?
            .get(key)?
            .as_str()
            .map(ToOwned::to_owned)
    }

    fn data_u64(&self, key: &str) -> Option<u64> {
        self.data.as_ref()?.get(key)?.as_u64()
    }

    pub(crate) fn into_runtime_error(self) -> RuntimeError {
        let kind = self.kind().map(ToOwned::to_owned);
        match kind.as_deref() {
            Some("LLMNotSet") => RuntimeError::LlmNotSet,
            Some("LLMNotSupported") => RuntimeError::LlmNotSupported {
                model: self.data_str("model").unwrap_or_default(),
                capabilities: self.capabilities(),
            },
            Some("ChatProviderError") => {
                let status_code = self
                    .data_u64("status_code")
                    .and_then(|code| u16::try_from(code).ok());
                RuntimeError::chat_provider(self.message, status_code)
            }
            Some("MaxStepsReached") => RuntimeError::MaxStepsReached {
                steps: self
                    .data_u64("n_steps")
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or_default(),
            },
            Some("RunCancelled") => RuntimeError::Cancelled,
            _ if self.code == INVALID_PARAMS => {
                RuntimeError::protocol(format!("agent rejected params: {}", self.message))
            }
            _ => RuntimeError::protocol(format!("agent error {}: {}", self.code, self.message)),
        }
    }

    fn capabilities(&self) -> String {
        match self.data.as_ref().and_then(|d| d.get("capabilities")) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            Some(Value::String(text)) => text.clone(),
            _ => String::new(),
        }
    }
}

/// One decoded frame from the agent.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Incoming {
    /// Call from the agent. `id` is `None` for notifications.
    Call {
        id: Option<Value>,
        method: String,
        params: Value,
    },
    /// Answer to one of our calls.
    Response {
        id: Value,
        outcome: Result<Value, RpcError>,
    },
}

#[derive(serde::Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

pub(crate) fn decode_line(line: &str) -> Result<Incoming, RuntimeError> {
    let frame: RawFrame = serde_json::from_str(line)
        .map_err(|e| RuntimeError::protocol(format!("invalid JSON-RPC frame: {e}")))?;
    if let Some(method) = frame.method {
        return Ok(Incoming::Call {
            id: frame.id.filter(|id| !id.is_null()),
            method,
            params: frame.params.unwrap_or(Value::Null),
        });
    }
    let Some(id) = frame.id else {
        return Err(RuntimeError::protocol(
            "JSON-RPC frame has neither method nor id",
        ));
    };
    let outcome = match frame.error {
        Some(error) => Err(error),
        None => Ok(frame.result.unwrap_or(Value::Null)),
    };
    Ok(Incoming::Response { id, outcome })
}

pub(crate) fn request(id: &str, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

pub(crate) fn result_response(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

pub(crate) fn error_response(id: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

pub(crate) fn method_not_found(id: &Value, method: &str) -> Value {
    error_response(id, METHOD_NOT_FOUND, &format!("unknown method {method}"))
}

pub(crate) fn approval_response(id: &Value, request_id: &str, response: ApprovalResponse) -> Value {
    result_response(id, json!({"request_id": request_id, "response": response}))
}

pub(crate) fn tool_result_response(id: &Value, result: &ToolResult) -> Value {
    result_response(
        id,
        json!({"tool_call_id": result.tool_call_id, "return_value": result.return_value}),
    )
}

pub(crate) fn initialize_params(tools: &[ToolDefinition]) -> Value {
    json!({"protocol_version": PROTOCOL_VERSION, "external_tools": tools})
}

/// Serializes a frame as one line, newline included.
pub(crate) fn encode_line(frame: &Value) -> Result<String, RuntimeError> {
    let mut line = serde_json::to_string(frame)
        .map_err(|e| RuntimeError::protocol(format!("failed to encode frame: {e}")))?;
    line.push('\n');
    Ok(line)
}

/// Decodes the `{type, payload}` params of `event` and `request` calls.
pub(crate) fn decode_event(params: Value) -> Result<Event, RuntimeError> {
    let envelope: EventEnvelope = serde_json::from_value(params)
        .map_err(|e| RuntimeError::protocol(format!("invalid event envelope: {e}")))?;
    let kind = envelope.kind.clone();
    Event::from_envelope(envelope)
        .map_err(|e| RuntimeError::protocol(format!("invalid {kind} payload: {e}")))
}

/// Call the agent makes through `request`; it waits for the answer.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum AgentRequest {
    Approval(ApprovalRequest),
    ToolCall(ToolCallRequest),
    Other(String),
}

/// Invocation of a tool registered by the SDK caller.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
pub(crate) struct ToolCallRequest {
    pub id: String,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    pub function: FunctionBody,
}

impl ToolCallRequest {
    /// Id the result is reported under.
    pub(crate) fn call_id(&self) -> &str {
        self.tool_call_id.as_deref().unwrap_or(&self.id)
    }
}

pub(crate) fn decode_request(params: Value) -> Result<AgentRequest, RuntimeError> {
    let envelope: EventEnvelope = serde_json::from_value(params)
        .map_err(|e| RuntimeError::protocol(format!("invalid request envelope: {e}")))?;
    let kind = envelope.kind.clone();
    if matches!(kind.as_str(), "ExternalToolCallRequest" | "ToolCallRequest") {
        return serde_json::from_value(envelope.payload)
            .map(AgentRequest::ToolCall)
            .map_err(|e| RuntimeError::protocol(format!("invalid {kind} payload: {e}")));
    }
    match Event::from_envelope(envelope) {
        Ok(Event::ApprovalRequest(request)) => Ok(AgentRequest::Approval(request)),
        Ok(_) => Ok(AgentRequest::Other(kind)),
        Err(e) => Err(RuntimeError::protocol(format!("invalid {kind} payload: {e}"))),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum PromptStatus {
    Pending,
    Finished,
    Cancelled,
    MaxStepsReached,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
pub(crate) struct PromptResult {
    pub status: PromptStatus,
    #[serde(default)]
    pub steps: Option<u32>,
}

impl PromptResult {
    pub(crate) fn from_value(value: Value) -> Result<Self, RuntimeError> {
        serde_json::from_value(value)
            .map_err(|e| RuntimeError::protocol(format!("invalid prompt result: {e}")))
    }

    /// `Ok(())` when the turn finished normally.
    pub(crate) fn into_outcome(self) -> Result<(), RuntimeError> {
        match self.status {
            PromptStatus::Finished => Ok(()),
            PromptStatus::Cancelled => Err(RuntimeError::Cancelled),
            PromptStatus::MaxStepsReached => Err(RuntimeError::MaxStepsReached {
                steps: self.steps.unwrap_or_default(),
            }),
            PromptStatus::Pending => Err(RuntimeError::protocol(
                "prompt returned while still pending",
            )),
        }
    }
}

/// Session metadata from the `initialize` handshake. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize)]
pub(crate) struct InitializeResult {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub slash_commands: Vec<String>,
    #[serde(default)]
    pub external_tools: Option<ExternalToolsResult>,
}

impl InitializeResult {
    pub(crate) fn from_value(value: Value) -> Result<Self, RuntimeError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
            .map_err(|e| RuntimeError::protocol(format!("invalid initialize result: {e}")))
    }

    pub(crate) fn first_rejected_tool(&self) -> Option<&RejectedTool> {
        self.external_tools.as_ref()?.rejected.first()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize)]
pub(crate) struct ExternalToolsResult {
    #[serde(default)]
    pub accepted: Vec<String>,
    #[serde(default)]
    pub rejected: Vec<RejectedTool>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
pub(crate) struct RejectedTool {
    pub name: String,
    #[serde(default)]
    pub reason: String,
}
