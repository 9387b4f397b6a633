use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt as _, AsyncRead, AsyncWrite, AsyncWriteExt as _, BufReader, Lines};
use tracing::{debug, warn};

use crate::approval::ApprovalResponse;
use crate::errors::RuntimeError;

use super::protocol::{self, AgentRequest, Incoming, RpcError};

pub(crate) type WireReader = Box<dyn AsyncRead + Send + Sync + Unpin>;
pub(crate) type WireWriter = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// Both halves of the agent's stdio pipe plus request-id bookkeeping.
pub(crate) struct WireConnection {
    writer: WireWriter,
    lines: Lines<BufReader<WireReader>>,
    next_id: u64,
    /// Prompt whose result has not been read yet.
    pub(crate) active_prompt: Option<String>,
    /// Fallback answer to an agent request the turn has not answered yet.
    pub(crate) pending_reply: Option<Value>,
}

impl WireConnection {
    pub(crate) fn new(reader: WireReader, writer: WireWriter) -> Self {
        Self {
            writer,
            lines: BufReader::new(reader).lines(),
            next_id: 0,
            active_prompt: None,
            pending_reply: None,
        }
    }

    pub(crate) fn next_request_id(&mut self) -> String {
        self.next_id += 1;
        format!("sdk-{}", self.next_id)
    }

    pub(crate) async fn send(&mut self, frame: &Value) -> Result<(), RuntimeError> {
        let line = protocol::encode_line(frame)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Reads the next decodable frame. `None` once the agent closes its output.
    ///
    /// Cancel-safe: only whole lines are consumed.
    pub(crate) async fn read_frame(&mut self) -> Result<Option<Incoming>, RuntimeError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            match protocol::decode_line(&line) {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => warn!(error = %err, "skipping undecodable frame from agent"),
            }
        }
    }

    /// Sends one request and waits for its response, answering anything
    /// the agent sends in between.
    pub(crate) async fn call(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<Result<Value, RpcError>, RuntimeError> {
        let id = self.next_request_id();
        self.send(&protocol::request(&id, method, params)).await?;
        loop {
            match self.read_frame().await? {
                None => {
                    return Err(RuntimeError::transport(format!(
                        "agent exited while waiting for {method}"
                    )));
                }
                Some(Incoming::Response { id: reply, outcome })
                    if reply.as_str() == Some(id.as_str()) =>
                {
                    return Ok(outcome);
                }
                Some(Incoming::Call { id, method, params }) => {
                    self.answer_unsolicited(id.as_ref(), &method, params).await?;
                }
                Some(Incoming::Response { id, .. }) => {
                    debug!(?id, "ignoring response to an earlier request");
                }
            }
        }
    }

    /// Finishes a turn whose stream was dropped before the prompt result
    /// arrived: answers the request it left open, cancels it, and drains
    /// frames until the result shows up.
    pub(crate) async fn settle(&mut self) -> Result<(), RuntimeError> {
        if let Some(reply) = self.pending_reply.take() {
            debug!("answering request left open by an abandoned turn");
            self.send(&reply).await?;
        }
        let Some(prompt_id) = self.active_prompt.take() else {
            return Ok(());
        };
        debug!(prompt_id = %prompt_id, "draining abandoned turn");
        let cancel_id = self.next_request_id();
        self.send(&protocol::request(&cancel_id, "cancel", json!({})))
            .await?;
        loop {
            match self.read_frame().await? {
                None => {
                    return Err(RuntimeError::transport(
                        "agent exited while draining an abandoned turn",
                    ));
                }
                Some(Incoming::Response { id, .. }) if id.as_str() == Some(prompt_id.as_str()) => {
                    return Ok(());
                }
                Some(Incoming::Response { .. }) => {}
                Some(Incoming::Call { id, method, params }) => {
                    self.answer_unsolicited(id.as_ref(), &method, params).await?;
                }
            }
        }
    }

    /// Replies to a call nobody is listening for. Events are acknowledged,
    /// approval requests rejected and tool calls refused so the agent never
    /// blocks on them.
    async fn answer_unsolicited(
        &mut self,
        id: Option<&Value>,
        method: &str,
        params: Value,
    ) -> Result<(), RuntimeError> {
        let Some(id) = id else {
            return Ok(());
        };
        let reply = match method {
            "event" => protocol::result_response(id, json!({})),
            "request" => match protocol::decode_request(params) {
                Ok(AgentRequest::Approval(request)) => {
                    warn!(request_id = %request.id, "rejecting approval request outside a turn");
                    protocol::approval_response(id, &request.id, ApprovalResponse::Reject)
                }
                Ok(AgentRequest::ToolCall(call)) => {
                    warn!(tool = %call.function.name, "refusing tool call outside a turn");
                    protocol::error_response(id, protocol::INVALID_PARAMS, "no turn in progress")
                }
                _ => protocol::method_not_found(id, method),
            },
            other => protocol::method_not_found(id, other),
        };
        self.send(&reply).await
    }
}
