use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use agent_sdk::{AgentRuntime, Message, PromptOptions, Role, ToolCall};
use futures::StreamExt as _;

const TASK: &str = "You are a cataloging assistant.

Task:
- Inspect the working directory
- List every example or demo subfolder
- For each one, report:
  - A 1-2 sentence description of what it does
  - A difficulty label: Easy, Medium, or Hard
  - Who it is for (what type of user or need)
- Always read both the README and the main entry file, then synthesize your own description
- Keep the final report concise and structured

Rules:
- You must read from the filesystem to avoid guessing
- Avoid emojis and keep output ASCII
- Output a single Markdown report and nothing else
- Use a single table
- Table columns: Example, Description, Difficulty, Best For
";

pub struct Report {
    pub log_path: PathBuf,
    pub report_path: PathBuf,
}

/// Runs the cataloging task, writing one log line per message and the last
/// non-empty assistant text as the report.
pub async fn run(
    runtime: &dyn AgentRuntime,
    options: PromptOptions,
    output_dir: &Path,
) -> Result<Report, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(output_dir)?;
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let log_path = output_dir.join(format!("messages-{timestamp}.log"));
    let report_path = output_dir.join("examples-catalog.md");

    let mut log = File::create(&log_path)?;
    let mut final_report = None;
    let mut messages = agent_sdk::prompt(runtime, TASK, options).await?;
    while let Some(message) = messages.next().await {
        let message = message?;
        writeln!(log, "{}", format_message(&message))?;
        log.flush()?;
        println!("{}", format_console_message(&message));
        if message.role == Role::Assistant {
            let text = message.extract_text();
            let text = text.trim();
            if !text.is_empty() {
                final_report = Some(text.to_string());
            }
        }
    }

    let Some(final_report) = final_report else {
        return Err("no final report generated".into());
    };
    std::fs::write(&report_path, final_report)?;
    Ok(Report {
        log_path,
        report_path,
    })
}

fn normalize_text(text: &str, escape_newlines: bool) -> String {
    if text.is_empty() {
        return "<empty>".to_string();
    }
    let text = text.replace("\r\n", "\n");
    if escape_newlines {
        text.replace('\n', "\\n")
    } else {
        text
    }
}

fn format_tool_calls(calls: &[ToolCall]) -> String {
    let payload: Vec<serde_json::Value> = calls
        .iter()
        .map(|call| {
            serde_json::json!({
                "id": call.id,
                "type": call.kind,
                "name": call.function.name,
                "arguments": call.function.arguments,
            })
        })
        .collect();
    serde_json::Value::Array(payload).to_string()
}

/// One log line: `ROLE | text | tool_calls=[...]`.
pub fn format_message(message: &Message) -> String {
    let role = message.role.as_str().to_uppercase();
    let text = normalize_text(&message.extract_text(), true);
    let tool_calls = match (&message.tool_calls, &message.tool_call_id) {
        (Some(calls), _) if !calls.is_empty() => format_tool_calls(calls),
        (_, Some(id)) if message.role == Role::Tool => {
            serde_json::json!([{ "tool_call_id": id }]).to_string()
        }
        _ => "[]".to_string(),
    };
    format!("{role} | {text} | tool_calls={tool_calls}")
}

pub fn format_console_message(message: &Message) -> String {
    let text = normalize_text(&message.extract_text(), false);
    let text = match text.trim() {
        "" => "<empty>".to_string(),
        trimmed => trimmed.replace('\n', "\n  "),
    };
    let hint = match (&message.tool_calls, &message.tool_call_id) {
        (Some(calls), _) if !calls.is_empty() => format!(" [tool_calls: {}]", calls.len()),
        (_, Some(id)) if message.role == Role::Tool => format!(" [tool_call_id: {id}]"),
        _ => String::new(),
    };
    format!("{}{hint}\n  {text}", message.role.as_str().to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_line_includes_tool_calls() {
        let message = Message::assistant(
            "Reading\nfiles",
            vec![ToolCall::new("call-1", "ReadFile", "{\"path\":\"a\"}")],
        );
        let line = format_message(&message);
        assert!(line.starts_with("ASSISTANT | Reading\\nfiles | tool_calls=["));
        assert!(line.contains("\"name\":\"ReadFile\""));
    }

    #[test]
    fn tool_messages_reference_their_call() {
        let message = Message::tool("call-1", "");
        assert_eq!(
            format_message(&message),
            "TOOL | <empty> | tool_calls=[{\"tool_call_id\":\"call-1\"}]"
        );
        assert_eq!(
            format_console_message(&message),
            "TOOL [tool_call_id: call-1]\n  <empty>"
        );
    }
}
