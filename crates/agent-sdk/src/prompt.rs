//! One-call prompting: creates a session, resolves approval requests, and
//! yields aggregated messages.
//!
//! ```no_run
//! use agent_sdk::prelude::*;
//! use agent_sdk::vendors::kimi_cli::KimiCliRuntime;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), SdkError> {
//! let runtime = KimiCliRuntime::from_env()?;
//! let text = prompt_text(
//!     &runtime,
//!     "What is 2 + 2?",
//!     PromptOptions::new().yolo(true),
//! )
//! .await?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::path::PathBuf;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::{debug, warn};

use crate::aggregator::{MessageAggregator, OutputMode};
use crate::approval::{ApprovalGate, ApprovalHandler};
use crate::config::ConfigSource;
use crate::content::Content;
use crate::errors::SdkError;
use crate::message::{Message, Role};
use crate::options::{McpConfig, RalphIterations, SessionOptions};
use crate::runtime::AgentRuntime;
use crate::session::{PromptStream, RunOptions, Session};
use crate::tools::ExternalTool;

/// Lazy, finite sequence of aggregated messages.
pub type MessageStream = Pin<Box<dyn futures::Stream<Item = Result<Message, SdkError>> + Send>>;

/// Options for [`prompt`].
///
/// Exactly one of `yolo(true)` and `approval_handler(..)` must be set.
#[derive(Clone, Debug, Default)]
pub struct PromptOptions {
    pub session: SessionOptions,
    pub output_mode: OutputMode,
    pub approval_handler: Option<ApprovalHandler>,
}

impl PromptOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all session options at once.
    pub fn session(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session = self.session.work_dir(dir);
        self
    }

    pub fn config(mut self, config: impl Into<ConfigSource>) -> Self {
        self.session = self.session.config(config);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.session = self.session.model(model);
        self
    }

    pub fn thinking(mut self, thinking: bool) -> Self {
        self.session = self.session.thinking(thinking);
        self
    }

    pub fn agent_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session = self.session.agent_file(path);
        self
    }

    pub fn mcp_config(mut self, config: McpConfig) -> Self {
        self.session = self.session.mcp_config(config);
        self
    }

    pub fn skills_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session = self.session.skills_dir(dir);
        self
    }

    pub fn max_steps_per_turn(mut self, steps: u32) -> Self {
        self.session = self.session.max_steps_per_turn(steps);
        self
    }

    pub fn max_retries_per_step(mut self, retries: u32) -> Self {
        self.session = self.session.max_retries_per_step(retries);
        self
    }

    pub fn max_ralph_iterations(mut self, iterations: RalphIterations) -> Self {
        self.session = self.session.max_ralph_iterations(iterations);
        self
    }

    pub fn tool(mut self, tool: impl ExternalTool + 'static) -> Self {
        self.session = self.session.tool(tool);
        self
    }

    /// Approves every request, both in the runtime and in the gate.
    pub fn yolo(mut self, yolo: bool) -> Self {
        self.session = self.session.yolo(yolo);
        self
    }

    pub fn approval_handler(mut self, handler: ApprovalHandler) -> Self {
        self.approval_handler = Some(handler);
        self
    }

    pub fn output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    /// Shorthand for `output_mode(OutputMode::FinalOnly)`.
    pub fn final_message_only(self) -> Self {
        self.output_mode(OutputMode::FinalOnly)
    }
}

/// Runs one prompt in a fresh session and returns its aggregated messages.
///
/// Configuration errors are returned before any session is created. Runtime
/// errors end the stream at the point they occur; messages already yielded
/// stay valid. The session is closed when the stream ends or fails.
pub async fn prompt(
    runtime: &dyn AgentRuntime,
    input: impl Into<Content>,
    options: PromptOptions,
) -> Result<MessageStream, SdkError> {
    let input = input.into();
    let PromptOptions {
        session: session_options,
        output_mode,
        approval_handler,
    } = options;
    let gate = ApprovalGate::from_settings(session_options.yolo, approval_handler)?;

    let session = Session::create(runtime, session_options).await?;
    let events = match session.prompt_with(input, RunOptions::default().merge_wire_messages(true)) {
        Ok(events) => events,
        Err(err) => {
            close_after_failure(&session).await;
            return Err(err);
        }
    };
    debug!(session_id = %session.id(), ?output_mode, "prompt stream started");

    let state = PromptState {
        session,
        events,
        gate,
        aggregator: MessageAggregator::new(output_mode),
        pending: VecDeque::new(),
        drained: false,
    };
    Ok(Box::pin(stream::try_unfold(state, |mut state| async move {
        loop {
            if let Some(message) = state.pending.pop_front() {
                return Ok(Some((message, state)));
            }
            if state.drained {
                let usage = state.session.token_usage();
                debug!(
                    session_id = %state.session.id(),
                    input_tokens = usage.total_input(),
                    output_tokens = usage.output,
                    "prompt finished"
                );
                state.session.close().await?;
                return Ok(None);
            }
            match state.events.next().await {
                Some(Ok(event)) => {
                    if let Some(event) = state.gate.intercept(event).await {
                        state.pending.extend(state.aggregator.feed(event));
                    }
                }
                Some(Err(err)) => {
                    close_after_failure(&state.session).await;
                    return Err(err);
                }
                None => {
                    state.pending.extend(state.aggregator.flush());
                    state.drained = true;
                }
            }
        }
    })))
}

/// Runs [`prompt`] and returns the concatenated text of the assistant
/// messages.
pub async fn prompt_text(
    runtime: &dyn AgentRuntime,
    input: impl Into<Content>,
    options: PromptOptions,
) -> Result<String, SdkError> {
    let mut messages = prompt(runtime, input, options).await?;
    let mut text = String::new();
    while let Some(message) = messages.next().await {
        let message = message?;
        if message.role == Role::Assistant {
            text.push_str(&message.extract_text());
        }
    }
    Ok(text)
}

struct PromptState {
    session: Session,
    events: PromptStream,
    gate: ApprovalGate,
    aggregator: MessageAggregator,
    pending: VecDeque<Message>,
    drained: bool,
}

async fn close_after_failure(session: &Session) {
    if let Err(err) = session.close().await {
        warn!(session_id = %session.id(), error = %err, "failed to close session after error");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::approval::{ApprovalRequest, ApprovalResponse, PendingApproval};
    use crate::content::ContentPart;
    use crate::errors::RuntimeError;
    use crate::message::{ToolCall, ToolResult, ToolReturnValue};
    use crate::runtime::scripted::{Script, ScriptedRuntime};
    use crate::wire::{Event, StepBegin};

    fn approval() -> (Event, PendingApproval) {
        let (request, pending) =
            ApprovalRequest::new("req-1", "call-1", "Shell", "run command", "ls").with_responder();
        (Event::ApprovalRequest(request), pending)
    }

    fn full_run(approval_event: Event) -> Script {
        Script::Events(vec![
            Ok(Event::StepBegin(StepBegin { n: 1 })),
            Ok(Event::ContentPart(ContentPart::text("hello"))),
            Ok(Event::ToolCall(ToolCall::new("call-1", "echo", "{}"))),
            Ok(approval_event),
            Ok(Event::ToolResult(ToolResult::new(
                "call-1",
                ToolReturnValue::ok("ok"),
            ))),
            Ok(Event::StepBegin(StepBegin { n: 2 })),
            Ok(Event::ContentPart(ContentPart::text("done"))),
        ])
    }

    async fn collect(stream: MessageStream) -> Vec<Result<Message, SdkError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn approval_settings_are_checked_before_session_creation() {
        let runtime = ScriptedRuntime::new(vec![]);

        let both = prompt(
            &runtime,
            "hi",
            PromptOptions::new()
                .yolo(true)
                .approval_handler(ApprovalHandler::AutoApprove),
        )
        .await;
        assert!(matches!(both, Err(SdkError::Config(msg)) if msg.contains("mutually exclusive")));

        let neither = prompt(&runtime, "hi", PromptOptions::new()).await;
        assert!(matches!(neither, Err(SdkError::Config(msg)) if msg.contains("must be provided")));
        assert_eq!(runtime.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn full_mode_yields_steps_and_resolves_approvals() {
        let (event, pending) = approval();
        let runtime = ScriptedRuntime::new(vec![full_run(event)]);

        let stream = prompt(&runtime, "hi", PromptOptions::new().yolo(true))
            .await
            .expect("prompt");
        let messages: Vec<Message> = collect(stream)
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .expect("messages");

        assert_eq!(pending.decision().await, ApprovalResponse::Approve);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].extract_text(), "hello");
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(messages[2].extract_text(), "done");
        assert_eq!(runtime.run_loop.cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(
            *runtime.run_loop.merge_flags.lock().expect("flags"),
            vec![true]
        );
    }

    #[tokio::test]
    async fn custom_handler_decides_and_final_only_keeps_last_step() {
        let (event, pending) = approval();
        let runtime = ScriptedRuntime::new(vec![full_run(event)]);
        let handler = ApprovalHandler::immediate(|request| {
            request.resolve(ApprovalResponse::ApproveForSession);
        });

        let text = prompt_text(
            &runtime,
            "hi",
            PromptOptions::new()
                .approval_handler(handler)
                .final_message_only(),
        )
        .await
        .expect("text");

        assert_eq!(text, "done");
        assert_eq!(pending.decision().await, ApprovalResponse::ApproveForSession);
    }

    #[tokio::test]
    async fn runtime_error_ends_stream_after_yielded_messages() {
        let runtime = ScriptedRuntime::new(vec![Script::Events(vec![
            Ok(Event::ContentPart(ContentPart::text("step one"))),
            Ok(Event::StepBegin(StepBegin { n: 2 })),
            Err(RuntimeError::chat_provider("rate limited", Some(429))),
        ])]);

        let stream = prompt(&runtime, "hi", PromptOptions::new().yolo(true))
            .await
            .expect("prompt");
        let items = collect(stream).await;

        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Ok(m) if m.extract_text() == "step one"));
        assert!(matches!(
            &items[1],
            Err(SdkError::Runtime(RuntimeError::ChatProvider { status_code: Some(429), .. }))
        ));
        assert_eq!(runtime.run_loop.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_failure_closes_the_session() {
        let runtime = ScriptedRuntime::new(vec![Script::StartError(RuntimeError::LlmNotSet)]);
        let result = prompt(&runtime, "hi", PromptOptions::new().yolo(true)).await;
        assert!(matches!(result, Err(SdkError::Runtime(RuntimeError::LlmNotSet))));
        assert_eq!(runtime.run_loop.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn structured_input_reaches_the_run_loop() {
        let runtime = ScriptedRuntime::new(vec![Script::Events(vec![])]);
        let input = vec![
            ContentPart::text("describe"),
            ContentPart::image_url("https://example.com/cat.png"),
        ];
        let stream = prompt(&runtime, input.clone(), PromptOptions::new().yolo(true))
            .await
            .expect("prompt");
        assert!(collect(stream).await.is_empty());
        assert_eq!(
            *runtime.run_loop.inputs.lock().expect("inputs"),
            vec![Content::Parts(input)]
        );
    }
}
