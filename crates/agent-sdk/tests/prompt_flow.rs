use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::{StreamExt as _, stream};

use agent_sdk::prelude::*;
use agent_sdk::wire::StepBegin;
use agent_sdk::{
    AgentRuntime, EventStream, PendingApproval, RunLoop, RunRequest, RuntimeError,
    StatusSnapshot, ToolCall, ToolResult, ToolReturnValue,
};

/// Run loop that replays one fixed event list per run.
struct ReplayRunLoop {
    runs: Mutex<VecDeque<Vec<Result<Event, RuntimeError>>>>,
    cleanups: AtomicUsize,
}

#[async_trait::async_trait]
impl RunLoop for ReplayRunLoop {
    fn id(&self) -> &str {
        "replay"
    }

    fn model_name(&self) -> &str {
        "replay-model"
    }

    fn status(&self) -> StatusSnapshot {
        StatusSnapshot::default()
    }

    fn start_run(&self, _request: RunRequest) -> Result<EventStream, RuntimeError> {
        let items = self
            .runs
            .lock()
            .expect("runs")
            .pop_front()
            .unwrap_or_default();
        Ok(Box::pin(stream::iter(items)))
    }

    async fn cleanup(&self) -> Result<(), RuntimeError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ReplayRuntime {
    run_loop: Arc<ReplayRunLoop>,
    creates: AtomicUsize,
}

impl ReplayRuntime {
    fn new(events: Vec<Result<Event, RuntimeError>>) -> Self {
        Self {
            run_loop: Arc::new(ReplayRunLoop {
                runs: Mutex::new(VecDeque::from([events])),
                cleanups: AtomicUsize::new(0),
            }),
            creates: AtomicUsize::new(0),
        }
    }

    fn cleanups(&self) -> usize {
        self.run_loop.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AgentRuntime for ReplayRuntime {
    async fn create(&self, _options: &SessionOptions) -> Result<Arc<dyn RunLoop>, RuntimeError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let run_loop: Arc<dyn RunLoop> = self.run_loop.clone();
        Ok(run_loop)
    }

    async fn resume(
        &self,
        _options: &SessionOptions,
    ) -> Result<Option<Arc<dyn RunLoop>>, RuntimeError> {
        Ok(None)
    }
}

fn step(n: u32) -> Result<Event, RuntimeError> {
    Ok(Event::StepBegin(StepBegin { n }))
}

fn text(value: &str) -> Result<Event, RuntimeError> {
    Ok(Event::ContentPart(ContentPart::text(value)))
}

fn approval(id: &str) -> (Result<Event, RuntimeError>, PendingApproval) {
    let (request, pending) =
        ApprovalRequest::new(id, "call-1", "Shell", "run command", "ls -la").with_responder();
    (Ok(Event::ApprovalRequest(request)), pending)
}

#[tokio::test]
async fn full_mode_yields_step_messages_and_resolves_approvals() {
    let (approval_event, pending) = approval("ap-1");
    let runtime = ReplayRuntime::new(vec![
        step(1),
        text("Let me "),
        text("look."),
        Ok(Event::ToolCall(ToolCall::new("call-1", "Shell", "{\"cmd\":"))),
        Ok(Event::ToolCallPart(agent_sdk::wire::ToolCallPart::new("\"ls\"}"))),
        approval_event,
        Ok(Event::ToolResult(ToolResult::new(
            "call-1",
            ToolReturnValue::ok("Cargo.toml"),
        ))),
        step(2),
        text("Found Cargo.toml."),
    ]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = seen.clone();
        ApprovalHandler::suspending(move |request: ApprovalRequest| {
            let seen = seen.clone();
            async move {
                tokio::task::yield_now().await;
                seen.lock().expect("seen").push(request.id.clone());
                request.resolve(ApprovalResponse::ApproveForSession);
            }
        })
    };

    let messages: Vec<Message> = prompt(
        &runtime,
        "what is here?",
        PromptOptions::new().approval_handler(handler),
    )
    .await
    .expect("prompt")
    .map(|message| message.expect("message"))
    .collect()
    .await;

    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].role, Role::Assistant);
    assert_eq!(messages[0].extract_text(), "Let me look.");
    let calls = messages[0].tool_calls.as_ref().expect("tool calls");
    assert_eq!(calls[0].arguments(), "{\"cmd\":\"ls\"}");
    assert_eq!(messages[1].role, Role::Tool);
    assert_eq!(messages[1].tool_call_id.as_deref(), Some("call-1"));
    assert!(messages[1].extract_text().contains("Cargo.toml"));
    assert_eq!(messages[2].extract_text(), "Found Cargo.toml.");

    assert_eq!(*seen.lock().expect("seen"), vec!["ap-1".to_string()]);
    assert_eq!(pending.decision().await, ApprovalResponse::ApproveForSession);
    assert_eq!(runtime.cleanups(), 1);
}

#[tokio::test]
async fn final_only_mode_returns_the_last_step_text() {
    let runtime = ReplayRuntime::new(vec![
        step(1),
        text("thinking out loud"),
        Ok(Event::ToolCall(ToolCall::new("call-1", "ReadFile", "{}"))),
        step(2),
        text("The answer is 4."),
    ]);

    let text = prompt_text(
        &runtime,
        "What is 2 + 2?",
        PromptOptions::new().yolo(true).final_message_only(),
    )
    .await
    .expect("prompt");

    assert_eq!(text, "The answer is 4.");
    assert_eq!(runtime.cleanups(), 1);
}

#[tokio::test]
async fn handler_that_never_decides_rejects_the_request() {
    let (approval_event, pending) = approval("ap-2");
    let runtime = ReplayRuntime::new(vec![step(1), approval_event, text("done")]);

    let text = prompt_text(
        &runtime,
        "delete it",
        PromptOptions::new().approval_handler(ApprovalHandler::immediate(|_| {})),
    )
    .await
    .expect("prompt");

    assert_eq!(text, "done");
    assert_eq!(pending.decision().await, ApprovalResponse::Reject);
}

#[tokio::test]
async fn upstream_error_ends_the_stream_after_flushed_messages() {
    let runtime = ReplayRuntime::new(vec![
        step(1),
        text("partial"),
        step(2),
        Err(RuntimeError::MaxStepsReached { steps: 2 }),
    ]);

    let mut messages = prompt(&runtime, "loop", PromptOptions::new().yolo(true))
        .await
        .expect("prompt");

    let first = messages.next().await.expect("item").expect("message");
    assert_eq!(first.extract_text(), "partial");
    let err = messages.next().await.expect("item").expect_err("error");
    assert_eq!(
        err,
        SdkError::Runtime(RuntimeError::MaxStepsReached { steps: 2 })
    );
    assert_eq!(runtime.cleanups(), 1);
}

#[tokio::test]
async fn approval_settings_are_validated_before_a_session_exists() {
    let runtime = ReplayRuntime::new(Vec::new());

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
    assert!(matches!(neither, Err(SdkError::Config(_))));

    assert_eq!(runtime.creates.load(Ordering::SeqCst), 0);
}
