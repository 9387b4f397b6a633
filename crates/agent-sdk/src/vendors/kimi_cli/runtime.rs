use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::stream;
use serde_json::json;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::approval::{ApprovalResponse, PendingApproval};
use crate::config::ConfigSource;
use crate::content::Content;
use crate::errors::{RuntimeError, SdkError};
use crate::message::{ToolResult, ToolReturnValue};
use crate::options::SessionOptions;
use crate::runtime::{AgentRuntime, EventStream, RunLoop, RunRequest};
use crate::tools::ToolRegistry;
use crate::wire::{Event, StatusSnapshot};

use super::config::KimiCliConfig;
use super::connection::WireConnection;
use super::protocol::{
    self, AgentRequest, Incoming, InitializeResult, PromptResult, RpcError, ToolCallRequest,
};

/// Which session the agent process should open.
#[derive(Clone, Debug, PartialEq, Eq)]
enum SessionTarget {
    New(String),
    Existing(String),
    MostRecent,
}

impl SessionTarget {
    fn id(&self) -> Option<&str> {
        match self {
            Self::New(id) | Self::Existing(id) => Some(id),
            Self::MostRecent => None,
        }
    }
}

/// [`AgentRuntime`] backed by the `kimi` CLI in wire mode.
///
/// Every session is its own `kimi --wire` child process. The process is
/// killed on [`RunLoop::cleanup`] or when the run loop is dropped.
#[derive(Clone, Debug)]
pub struct KimiCliRuntime {
    config: KimiCliConfig,
}

impl KimiCliRuntime {
    pub fn new(config: KimiCliConfig) -> Result<Self, SdkError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Creates a runtime using `KIMI_CLI_PATH`, `KIMI_BASE_URL` and `KIMI_API_KEY`.
    pub fn from_env() -> Result<Self, SdkError> {
        Self::new(KimiCliConfig::from_env()?)
    }

    pub fn config(&self) -> &KimiCliConfig {
        &self.config
    }

    async fn launch(
        &self,
        options: &SessionOptions,
        target: SessionTarget,
    ) -> Result<Option<Arc<KimiCliRunLoop>>, RuntimeError> {
        let work_dir = options
            .resolved_work_dir()
            .map_err(|e| RuntimeError::Config(e.to_string()))?;
        let mut args = session_args(options, &target, &work_dir)?;
        args.extend(self.config.args.iter().cloned());

        let mut command = Command::new(&self.config.executable);
        command
            .args(&args)
            .envs(self.config.child_env())
            .current_dir(&work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        debug!(executable = %self.config.executable.display(), work_dir = %work_dir.display(), "spawning agent");
        let mut child = command.spawn().map_err(|e| {
            RuntimeError::transport(format!(
                "failed to spawn {}: {e}",
                self.config.executable.display()
            ))
        })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(RuntimeError::transport("agent stdio is not piped"));
        };

        let mut conn = WireConnection::new(Box::new(stdout), Box::new(stdin));
        let info = match handshake(&mut conn, &options.tools).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                let _ = child.kill().await;
                return Ok(None);
            }
            Err(err) => {
                let _ = child.kill().await;
                return Err(err);
            }
        };
        let (id, model_name) = session_identity(info, &target, options);
        Ok(Some(KimiCliRunLoop::from_parts(
            id,
            model_name,
            options.yolo,
            conn,
            options.tools.clone(),
            Some(child),
        )))
    }
}

#[async_trait::async_trait]
impl AgentRuntime for KimiCliRuntime {
    async fn create(&self, options: &SessionOptions) -> Result<Arc<dyn RunLoop>, RuntimeError> {
        let id = options
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let Some(run_loop) = self.launch(options, SessionTarget::New(id)).await? else {
            return Err(RuntimeError::protocol("agent did not open the new session"));
        };
        let run_loop: Arc<dyn RunLoop> = run_loop;
        Ok(run_loop)
    }

    async fn resume(
        &self,
        options: &SessionOptions,
    ) -> Result<Option<Arc<dyn RunLoop>>, RuntimeError> {
        let target = match &options.session_id {
            Some(id) => SessionTarget::Existing(id.clone()),
            None => SessionTarget::MostRecent,
        };
        let run_loop = self.launch(options, target).await?;
        Ok(run_loop.map(|run_loop| run_loop as Arc<dyn RunLoop>))
    }
}

/// Command-line flags for one session.
fn session_args(
    options: &SessionOptions,
    target: &SessionTarget,
    work_dir: &Path,
) -> Result<Vec<String>, RuntimeError> {
    let mut args = vec![
        "--wire".to_string(),
        "--work-dir".to_string(),
        work_dir.display().to_string(),
    ];
    match target {
        SessionTarget::New(id) | SessionTarget::Existing(id) => {
            args.extend(["--session".to_string(), id.clone()]);
        }
        SessionTarget::MostRecent => args.push("--continue".into()),
    }
    match &options.config {
        Some(ConfigSource::Inline(config)) => {
            let json = config
                .to_json_string()
                .map_err(|e| RuntimeError::Config(e.to_string()))?;
            args.extend(["--config".to_string(), json]);
        }
        Some(ConfigSource::File(path)) => {
            args.extend(["--config-file".to_string(), path.display().to_string()]);
        }
        None => {}
    }
    if let Some(model) = &options.model {
        args.extend(["--model".to_string(), model.clone()]);
    }
    let thinking = if options.thinking { "--thinking" } else { "--no-thinking" };
    args.push(thinking.to_string());
    if options.yolo {
        args.push("--auto-approve".into());
    }
    if let Some(path) = &options.agent_file {
        args.extend(["--agent-file".to_string(), path.display().to_string()]);
    }
    for mcp in &options.mcp_configs {
        let json = serde_json::to_string(mcp)
            .map_err(|e| RuntimeError::Config(format!("invalid MCP config: {e}")))?;
        args.extend(["--mcp-config".to_string(), json]);
    }
    if let Some(dir) = &options.skills_dir {
        args.extend(["--skills-dir".to_string(), dir.display().to_string()]);
    }
    if let Some(steps) = options.max_steps_per_turn {
        args.extend(["--max-steps-per-turn".to_string(), steps.to_string()]);
    }
    if let Some(retries) = options.max_retries_per_step {
        args.extend(["--max-retries-per-step".to_string(), retries.to_string()]);
    }
    if let Some(iterations) = options.max_ralph_iterations {
        args.extend([
            "--max-ralph-iterations".to_string(),
            iterations.as_arg().to_string(),
        ]);
    }
    Ok(args)
}

/// Runs the `initialize` handshake, offering the external tools. `Ok(None)`
/// when the agent reports that the requested session does not exist.
async fn handshake(
    conn: &mut WireConnection,
    tools: &ToolRegistry,
) -> Result<Option<InitializeResult>, RuntimeError> {
    let outcome = conn
        .call("initialize", protocol::initialize_params(&tools.definitions()))
        .await?;
    let info = match outcome {
        Ok(value) => InitializeResult::from_value(value)?,
        Err(err) if err.is_method_not_found() => {
            if !tools.is_empty() {
                return Err(RuntimeError::Config(
                    "agent does not support external tools".into(),
                ));
            }
            debug!("agent has no initialize method; continuing without session metadata");
            InitializeResult::default()
        }
        Err(err) if err.kind() == Some("SessionNotFound") => return Ok(None),
        Err(err) => return Err(err.into_runtime_error()),
    };
    if let Some(rejected) = info.first_rejected_tool() {
        return Err(RuntimeError::Config(format!(
            "external tool {} was rejected: {}",
            rejected.name, rejected.reason
        )));
    }
    Ok(Some(info))
}

/// Session id and model name. What the agent reports wins over what was
/// requested.
fn session_identity(
    info: InitializeResult,
    target: &SessionTarget,
    options: &SessionOptions,
) -> (String, String) {
    let id = info
        .session_id
        .or_else(|| target.id().map(ToOwned::to_owned))
        .unwrap_or_default();
    let model_name = info
        .model_name
        .or_else(|| options.model.clone())
        .unwrap_or_default();
    (id, model_name)
}

/// One `kimi --wire` session.
pub struct KimiCliRunLoop {
    id: String,
    model_name: String,
    yolo: bool,
    /// Last reported context usage, stored as `f64` bits.
    context_usage: Arc<AtomicU64>,
    conn: Arc<Mutex<WireConnection>>,
    tools: ToolRegistry,
    child: Mutex<Option<Child>>,
}

impl KimiCliRunLoop {
    fn from_parts(
        id: String,
        model_name: String,
        yolo: bool,
        conn: WireConnection,
        tools: ToolRegistry,
        child: Option<Child>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            model_name,
            yolo,
            context_usage: Arc::new(AtomicU64::new(0f64.to_bits())),
            conn: Arc::new(Mutex::new(conn)),
            tools,
            child: Mutex::new(child),
        })
    }

    /// Run loop over an already-connected pipe, without a child process.
    #[cfg(test)]
    pub(crate) fn over_pipe(
        id: &str,
        model_name: &str,
        conn: WireConnection,
        tools: ToolRegistry,
    ) -> Arc<Self> {
        Self::from_parts(id.to_string(), model_name.to_string(), false, conn, tools, None)
    }
}

impl std::fmt::Debug for KimiCliRunLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KimiCliRunLoop")
            .field("id", &self.id)
            .field("model_name", &self.model_name)
            .field("yolo", &self.yolo)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl RunLoop for KimiCliRunLoop {
    fn id(&self) -> &str {
        &self.id
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            context_usage: f64::from_bits(self.context_usage.load(Ordering::Relaxed)),
            yolo_enabled: self.yolo,
        }
    }

    fn start_run(&self, request: RunRequest) -> Result<EventStream, RuntimeError> {
        let state = TurnState {
            conn: self.conn.clone(),
            guard: None,
            input: Some(request.input),
            prompt_id: String::new(),
            cancel: request.cancel,
            cancel_sent: false,
            awaiting: None,
            context_usage: self.context_usage.clone(),
            tools: self.tools.clone(),
        };
        Ok(Box::pin(stream::try_unfold(state, next_event)))
    }

    async fn cleanup(&self) -> Result<(), RuntimeError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        debug!(session_id = %self.id, "stopping agent process");
        if let Err(err) = child.kill().await {
            warn!(session_id = %self.id, error = %err, "failed to kill agent process");
            return Err(err.into());
        }
        Ok(())
    }
}

/// Approval request handed to the consumer, waiting for its decision.
struct AwaitingApproval {
    rpc_id: serde_json::Value,
    request_id: String,
    pending: PendingApproval,
}

struct TurnState {
    conn: Arc<Mutex<WireConnection>>,
    /// Held for the whole turn once the prompt is sent.
    guard: Option<OwnedMutexGuard<WireConnection>>,
    input: Option<Content>,
    prompt_id: String,
    cancel: CancellationToken,
    cancel_sent: bool,
    awaiting: Option<AwaitingApproval>,
    context_usage: Arc<AtomicU64>,
    tools: ToolRegistry,
}

async fn next_event(mut state: TurnState) -> Result<Option<(Event, TurnState)>, RuntimeError> {
    let mut conn = match state.guard.take() {
        Some(conn) => conn,
        None => begin_turn(&mut state).await?,
    };
    let next = pump(&mut state, &mut conn).await?;
    state.guard = Some(conn);
    Ok(next.map(|event| (event, state)))
}

async fn begin_turn(state: &mut TurnState) -> Result<OwnedMutexGuard<WireConnection>, RuntimeError> {
    let mut conn = state.conn.clone().lock_owned().await;
    conn.settle().await?;
    if state.cancel.is_cancelled() {
        return Err(RuntimeError::Cancelled);
    }
    let input = state.input.take().unwrap_or_default();
    state.prompt_id = conn.next_request_id();
    conn.send(&protocol::request(
        &state.prompt_id,
        "prompt",
        json!({"user_input": input}),
    ))
    .await?;
    conn.active_prompt = Some(state.prompt_id.clone());
    debug!(prompt_id = %state.prompt_id, "prompt sent");
    Ok(conn)
}

enum Wake {
    Frame(Option<Incoming>),
    Cancel,
}

/// Reads frames until one yields an event or the turn ends.
async fn pump(
    state: &mut TurnState,
    conn: &mut WireConnection,
) -> Result<Option<Event>, RuntimeError> {
    if let Some(awaiting) = state.awaiting.take() {
        let decision = tokio::select! {
            decision = awaiting.pending.decision() => decision,
            () = state.cancel.cancelled() => ApprovalResponse::Reject,
        };
        debug!(request_id = %awaiting.request_id, ?decision, "answering approval request");
        conn.pending_reply = None;
        conn.send(&protocol::approval_response(
            &awaiting.rpc_id,
            &awaiting.request_id,
            decision,
        ))
        .await?;
    }

    loop {
        let wake = tokio::select! {
            frame = conn.read_frame() => Wake::Frame(frame?),
            () = state.cancel.cancelled(), if !state.cancel_sent => Wake::Cancel,
        };
        let incoming = match wake {
            Wake::Cancel => {
                state.cancel_sent = true;
                let id = conn.next_request_id();
                conn.send(&protocol::request(&id, "cancel", json!({})))
                    .await?;
                debug!(prompt_id = %state.prompt_id, "cancel sent");
                continue;
            }
            Wake::Frame(None) => {
                conn.active_prompt = None;
                conn.pending_reply = None;
                return Err(RuntimeError::transport("agent closed its output mid-turn"));
            }
            Wake::Frame(Some(incoming)) => incoming,
        };

        match incoming {
            Incoming::Response { id, outcome } if id.as_str() == Some(state.prompt_id.as_str()) => {
                conn.active_prompt = None;
                let result = outcome.map_err(RpcError::into_runtime_error)?;
                PromptResult::from_value(result)?.into_outcome()?;
                debug!(prompt_id = %state.prompt_id, "turn finished");
                return Ok(None);
            }
            Incoming::Response { id, outcome: Err(err) } => {
                debug!(?id, code = err.code, message = %err.message, "agent rejected a call");
            }
            Incoming::Response { .. } => {}
            Incoming::Call { id, method, params } => match method.as_str() {
                "event" => {
                    if let Some(id) = &id {
                        conn.send(&protocol::result_response(id, json!({}))).await?;
                    }
                    match protocol::decode_event(params) {
                        Ok(event) => {
                            if let Event::StatusUpdate(update) = &event
                                && let Some(usage) = update.context_usage
                            {
                                state.context_usage.store(usage.to_bits(), Ordering::Relaxed);
                            }
                            return Ok(Some(event));
                        }
                        Err(err) => warn!(error = %err, "dropping undecodable event"),
                    }
                }
                "request" => {
                    let Some(id) = id else {
                        warn!("dropping request without id");
                        continue;
                    };
                    match protocol::decode_request(params) {
                        Ok(AgentRequest::Approval(request)) => {
                            let (request, pending) = request.with_responder();
                            conn.pending_reply = Some(protocol::approval_response(
                                &id,
                                &request.id,
                                ApprovalResponse::Reject,
                            ));
                            state.awaiting = Some(AwaitingApproval {
                                rpc_id: id,
                                request_id: request.id.clone(),
                                pending,
                            });
                            return Ok(Some(Event::ApprovalRequest(request)));
                        }
                        Ok(AgentRequest::ToolCall(call)) => {
                            run_tool_call(state, conn, &id, call).await?;
                        }
                        Ok(AgentRequest::Other(kind)) => {
                            warn!(kind = %kind, "unsupported request from agent");
                            conn.send(&protocol::method_not_found(&id, &kind)).await?;
                        }
                        Err(err) => {
                            warn!(error = %err, "undecodable request from agent");
                            conn.send(&protocol::method_not_found(&id, "request")).await?;
                        }
                    }
                }
                other => {
                    warn!(method = other, "unknown method from agent");
                    if let Some(id) = &id {
                        conn.send(&protocol::method_not_found(id, other)).await?;
                    }
                }
            },
        }
    }
}

/// Runs a registered tool for the agent and sends back its result. A
/// cancelled turn answers with a failed result instead.
async fn run_tool_call(
    state: &TurnState,
    conn: &mut WireConnection,
    rpc_id: &serde_json::Value,
    call: ToolCallRequest,
) -> Result<(), RuntimeError> {
    let name = call.function.name.as_str();
    if state.tools.get(name).is_none() {
        warn!(tool = name, "agent called an unregistered tool");
        let message = format!("tool not found: {name}");
        return conn
            .send(&protocol::error_response(rpc_id, protocol::INVALID_PARAMS, &message))
            .await;
    }

    let cancelled = ToolResult::new(call.call_id(), ToolReturnValue::error("tool call cancelled"));
    conn.pending_reply = Some(protocol::tool_result_response(rpc_id, &cancelled));
    debug!(tool = name, call_id = call.call_id(), "running external tool");
    let outcome = tokio::select! {
        outcome = state.tools.invoke(name, call.function.arguments.as_deref()) => outcome,
        () = state.cancel.cancelled() => None,
    };
    let result = match outcome {
        Some(return_value) => ToolResult::new(call.call_id(), return_value),
        None => cancelled,
    };
    conn.pending_reply = None;
    conn.send(&protocol::tool_result_response(rpc_id, &result))
        .await
}
