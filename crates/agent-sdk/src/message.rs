use std::fmt;

use crate::content::{Content, ContentPart, merge_content};

/// Role of an aggregated message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    Tool,
    User,
    System,
}

impl Role {
    /// Returns the wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::User => "user",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Function name and (possibly still streaming) argument payload of a tool call.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FunctionBody {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

fn function_kind() -> String {
    "function".to_string()
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub id: String,
    pub function: FunctionBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ToolCall {
    /// Creates a function tool call with an initial argument payload.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            kind: function_kind(),
            id: id.into(),
            function: FunctionBody {
                name: name.into(),
                arguments: Some(arguments.into()),
            },
            extras: None,
        }
    }

    /// Returns the argument payload accumulated so far.
    pub fn arguments(&self) -> &str {
        self.function.arguments.as_deref().unwrap_or_default()
    }

    /// Appends a streamed argument chunk.
    pub fn append_arguments(&mut self, chunk: &str) {
        self.function
            .arguments
            .get_or_insert_with(String::new)
            .push_str(chunk);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Done,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TodoItem {
    pub title: String,
    pub status: TodoStatus,
}

/// Presentation hint attached to tool results and approval requests.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayBlock {
    /// Short human-readable summary.
    Brief { text: String },
    /// File change preview.
    Diff {
        path: String,
        old_text: String,
        new_text: String,
    },
    /// Todo list snapshot.
    Todo { items: Vec<TodoItem> },
    /// Block kind this SDK does not know yet.
    #[serde(other)]
    Unknown,
}

/// Outcome payload of a tool execution.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolReturnValue {
    pub is_error: bool,
    #[serde(default)]
    pub output: Content,
    /// Note addressed to the model (error description for failures).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub display: Vec<DisplayBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ToolReturnValue {
    /// Successful outcome.
    pub fn ok(output: impl Into<Content>) -> Self {
        Self {
            is_error: false,
            output: output.into(),
            message: String::new(),
            display: Vec::new(),
            extras: None,
        }
    }

    /// Failed outcome with an explanation for the model.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            output: Content::default(),
            message: message.into(),
            display: Vec::new(),
            extras: None,
        }
    }

    /// Sets the note addressed to the model.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Result of one tool call, keyed by the call id.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub return_value: ToolReturnValue,
}

impl ToolResult {
    pub fn new(tool_call_id: impl Into<String>, return_value: ToolReturnValue) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            return_value,
        }
    }
}

/// A complete, role-tagged conversation unit assembled from raw events.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    /// Tool calls attempted in this step (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Call this message answers (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Assistant message; an empty call list is stored as `None`.
    pub fn assistant(content: impl Into<Content>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Tool-role message answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Concatenated text of the message, ignoring non-text parts.
    pub fn extract_text(&self) -> String {
        self.content.text()
    }

    /// Converts a tool result into the tool-role message the model sees.
    pub fn from_tool_result(result: &ToolResult) -> Self {
        let value = &result.return_value;
        let mut parts = Vec::new();
        if value.is_error {
            parts.push(system_note(&format!("ERROR: {}", value.message)));
        } else if !value.message.is_empty() {
            parts.push(system_note(&value.message));
        }
        match &value.output {
            Content::Text(text) if text.is_empty() => {}
            Content::Text(text) => merge_content(&mut parts, ContentPart::text(text.clone())),
            Content::Parts(output) => parts.extend(output.iter().cloned()),
        }
        if parts.is_empty() {
            parts.push(system_note("Tool output is empty."));
        }
        Self::tool(result.tool_call_id.clone(), parts)
    }
}

fn system_note(text: &str) -> ContentPart {
    ContentPart::text(format!("<system>{text}</system>"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_arguments_starts_from_empty_payload() {
        let mut call = ToolCall {
            kind: "function".into(),
            id: "c1".into(),
            function: FunctionBody {
                name: "read".into(),
                arguments: None,
            },
            extras: None,
        };
        call.append_arguments("{\"path\":");
        call.append_arguments("\"a.txt\"}");
        assert_eq!(call.arguments(), "{\"path\":\"a.txt\"}");
    }

    #[test]
    fn tool_result_message_carries_output_and_call_id() {
        let message =
            Message::from_tool_result(&ToolResult::new("call-1", ToolReturnValue::ok("ok")));
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(message.extract_text(), "ok");
    }

    #[test]
    fn tool_error_is_prefixed_with_system_note() {
        let message = Message::from_tool_result(&ToolResult::new(
            "call-2",
            ToolReturnValue::error("file not found"),
        ));
        assert_eq!(
            message.extract_text(),
            "<system>ERROR: file not found</system>"
        );
    }

    #[test]
    fn empty_tool_output_is_reported() {
        let message =
            Message::from_tool_result(&ToolResult::new("call-3", ToolReturnValue::ok("")));
        assert_eq!(
            message.extract_text(),
            "<system>Tool output is empty.</system>"
        );
    }

    #[test]
    fn unknown_display_block_kind_is_tolerated() {
        let blocks: Vec<DisplayBlock> = serde_json::from_value(serde_json::json!([
            {"type": "brief", "text": "edit a.txt"},
            {"type": "shell", "command": "ls"}
        ]))
        .expect("display blocks");
        assert_eq!(
            blocks,
            vec![
                DisplayBlock::Brief {
                    text: "edit a.txt".into()
                },
                DisplayBlock::Unknown
            ]
        );
    }

    #[test]
    fn assistant_message_omits_empty_tool_call_list() {
        let message = Message::assistant("hi", Vec::new());
        let json = serde_json::to_value(&message).expect("serialize");
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }
}
