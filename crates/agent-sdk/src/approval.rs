//! Approval requests and the gate that resolves them before aggregation.
//!
//! A request is resolved at most once. The first `resolve` wins and is
//! forwarded to the producer; later calls are ignored and return `false`.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::SdkError;
use crate::message::DisplayBlock;
use crate::wire::Event;

/// Decision for an approval request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalResponse {
    /// Allow this action once.
    Approve,
    /// Allow this action and similar ones for the rest of the session.
    ApproveForSession,
    /// Deny the action.
    Reject,
}

#[derive(Debug, Default)]
struct Resolution {
    decision: OnceLock<ApprovalResponse>,
    responder: Mutex<Option<oneshot::Sender<ApprovalResponse>>>,
}

/// A gated action waiting for an external decision.
///
/// Clones share the same resolution state, so the request can be handed to
/// a suspending handler while the gate keeps its own handle.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub tool_call_id: String,
    /// Name of the tool asking for approval.
    pub sender: String,
    pub action: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub display: Vec<DisplayBlock>,
    #[serde(skip)]
    resolution: Arc<Resolution>,
}

impl ApprovalRequest {
    /// Creates a request that is not connected to any producer.
    pub fn new(
        id: impl Into<String>,
        tool_call_id: impl Into<String>,
        sender: impl Into<String>,
        action: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_call_id: tool_call_id.into(),
            sender: sender.into(),
            action: action.into(),
            description: description.into(),
            display: Vec::new(),
            resolution: Arc::default(),
        }
    }

    pub fn with_display(mut self, display: Vec<DisplayBlock>) -> Self {
        self.display = display;
        self
    }

    /// Connects the request to a producer and returns the producer's end.
    ///
    /// Any resolution recorded on the previous state is discarded.
    pub fn with_responder(mut self) -> (Self, PendingApproval) {
        let (tx, rx) = oneshot::channel();
        self.resolution = Arc::new(Resolution {
            decision: OnceLock::new(),
            responder: Mutex::new(Some(tx)),
        });
        (self, PendingApproval { rx })
    }

    /// Records the decision. Returns `false` if the request was already
    /// resolved, in which case the first decision stands.
    pub fn resolve(&self, response: ApprovalResponse) -> bool {
        if self.resolution.decision.set(response).is_err() {
            debug!(request_id = %self.id, ?response, "approval request already resolved; ignoring");
            return false;
        }
        let responder = self
            .resolution
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = responder {
            let _ = tx.send(response);
        }
        true
    }

    /// Returns the recorded decision, if any.
    pub fn decision(&self) -> Option<ApprovalResponse> {
        self.resolution.decision.get().copied()
    }

    pub fn is_resolved(&self) -> bool {
        self.decision().is_some()
    }
}

impl PartialEq for ApprovalRequest {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.tool_call_id == other.tool_call_id
            && self.sender == other.sender
            && self.action == other.action
            && self.description == other.description
            && self.display == other.display
            && self.decision() == other.decision()
    }
}

/// Producer-side handle that completes when the request is resolved.
#[derive(Debug)]
pub struct PendingApproval {
    rx: oneshot::Receiver<ApprovalResponse>,
}

impl PendingApproval {
    /// Waits for the decision. A request whose handles were all dropped
    /// without a decision counts as rejected.
    pub async fn decision(self) -> ApprovalResponse {
        self.rx.await.unwrap_or(ApprovalResponse::Reject)
    }
}

type ImmediateFn = dyn Fn(&ApprovalRequest) + Send + Sync;
type SuspendingFn = dyn Fn(ApprovalRequest) -> BoxFuture<'static, ()> + Send + Sync;

/// Caller-supplied (or built-in) approval policy.
#[derive(Clone)]
pub enum ApprovalHandler {
    /// Approve every request.
    AutoApprove,
    /// Handler that decides synchronously.
    Immediate(Arc<ImmediateFn>),
    /// Handler that may suspend (prompt a user, call a service, ...).
    Suspending(Arc<SuspendingFn>),
}

impl ApprovalHandler {
    pub fn immediate<F>(handler: F) -> Self
    where
        F: Fn(&ApprovalRequest) + Send + Sync + 'static,
    {
        Self::Immediate(Arc::new(handler))
    }

    pub fn suspending<F, Fut>(handler: F) -> Self
    where
        F: Fn(ApprovalRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Suspending(Arc::new(move |request| -> BoxFuture<'static, ()> {
            Box::pin(handler(request))
        }))
    }

    /// Runs the handler to completion. The handler is expected to call
    /// [`ApprovalRequest::resolve`] but is not forced to.
    pub async fn handle(&self, request: &ApprovalRequest) {
        match self {
            Self::AutoApprove => {
                request.resolve(ApprovalResponse::Approve);
            }
            Self::Immediate(handler) => handler(request),
            Self::Suspending(handler) => handler(request.clone()).await,
        }
    }
}

impl fmt::Debug for ApprovalHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoApprove => f.write_str("ApprovalHandler::AutoApprove"),
            Self::Immediate(_) => f.write_str("ApprovalHandler::Immediate(..)"),
            Self::Suspending(_) => f.write_str("ApprovalHandler::Suspending(..)"),
        }
    }
}

/// Consumes approval requests from an event stream so they never reach the
/// aggregator, and guarantees each one leaves resolved.
#[derive(Clone, Debug)]
pub struct ApprovalGate {
    handler: ApprovalHandler,
}

impl ApprovalGate {
    pub fn new(handler: ApprovalHandler) -> Self {
        Self { handler }
    }

    /// Builds a gate from the two mutually exclusive settings: `yolo`
    /// (approve everything) or a custom handler. Exactly one must be set.
    pub fn from_settings(yolo: bool, handler: Option<ApprovalHandler>) -> Result<Self, SdkError> {
        match (yolo, handler) {
            (true, Some(_)) => Err(SdkError::Config(
                "yolo and approval_handler are mutually exclusive".into(),
            )),
            (false, None) => Err(SdkError::Config(
                "either yolo or approval_handler must be provided".into(),
            )),
            (true, None) => Ok(Self::new(ApprovalHandler::AutoApprove)),
            (false, Some(handler)) => Ok(Self::new(handler)),
        }
    }

    /// Resolves approval requests and passes every other event through.
    pub async fn intercept(&self, event: Event) -> Option<Event> {
        match event {
            Event::ApprovalRequest(request) => {
                self.decide(&request).await;
                None
            }
            other => Some(other),
        }
    }

    /// Runs the handler and rejects the request if it is still unresolved.
    pub async fn decide(&self, request: &ApprovalRequest) -> ApprovalResponse {
        self.handler.handle(request).await;
        if !request.is_resolved() {
            warn!(
                request_id = %request.id,
                tool_call_id = %request.tool_call_id,
                sender = %request.sender,
                "approval handler returned without a decision; rejecting"
            );
            request.resolve(ApprovalResponse::Reject);
        }
        request.decision().unwrap_or(ApprovalResponse::Reject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentPart;

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest::new(id, "call-1", "Shell", "run command", "ls -la")
    }

    #[tokio::test]
    async fn first_resolution_reaches_the_producer_and_sticks() {
        let (request, pending) = request("r1").with_responder();
        assert!(request.resolve(ApprovalResponse::ApproveForSession));
        assert!(!request.resolve(ApprovalResponse::Reject));
        assert_eq!(
            request.decision(),
            Some(ApprovalResponse::ApproveForSession)
        );
        assert_eq!(pending.decision().await, ApprovalResponse::ApproveForSession);
    }

    #[tokio::test]
    async fn clones_share_resolution_state() {
        let request = request("r2");
        let copy = request.clone();
        copy.resolve(ApprovalResponse::Approve);
        assert_eq!(request.decision(), Some(ApprovalResponse::Approve));
    }

    #[tokio::test]
    async fn dropping_an_unresolved_request_reads_as_reject() {
        let (request, pending) = request("r3").with_responder();
        drop(request);
        assert_eq!(pending.decision().await, ApprovalResponse::Reject);
    }

    #[tokio::test]
    async fn gate_forces_reject_when_handler_does_nothing() {
        let gate = ApprovalGate::new(ApprovalHandler::immediate(|_| {}));
        let (request, pending) = request("r4").with_responder();
        let passed = gate
            .intercept(Event::ApprovalRequest(request.clone()))
            .await;
        assert!(passed.is_none());
        assert_eq!(request.decision(), Some(ApprovalResponse::Reject));
        assert_eq!(pending.decision().await, ApprovalResponse::Reject);
    }

    #[tokio::test]
    async fn suspending_handler_decision_is_kept() {
        let gate = ApprovalGate::new(ApprovalHandler::suspending(|request| async move {
            tokio::task::yield_now().await;
            request.resolve(ApprovalResponse::Approve);
        }));
        let request = request("r5");
        assert_eq!(gate.decide(&request).await, ApprovalResponse::Approve);
        assert_eq!(request.decision(), Some(ApprovalResponse::Approve));
    }

    #[tokio::test]
    async fn auto_approve_gate_approves() {
        let gate = ApprovalGate::from_settings(true, None).expect("gate");
        let request = request("r6");
        assert_eq!(gate.decide(&request).await, ApprovalResponse::Approve);
    }

    #[tokio::test]
    async fn non_approval_events_pass_through_untouched() {
        let gate = ApprovalGate::new(ApprovalHandler::AutoApprove);
        let event = Event::ContentPart(ContentPart::text("hi"));
        assert_eq!(gate.intercept(event.clone()).await, Some(event));
    }

    #[test]
    fn gate_settings_require_exactly_one_policy() {
        let both = ApprovalGate::from_settings(true, Some(ApprovalHandler::AutoApprove));
        assert!(matches!(both, Err(SdkError::Config(msg)) if msg.contains("mutually exclusive")));
        let neither = ApprovalGate::from_settings(false, None);
        assert!(matches!(neither, Err(SdkError::Config(msg)) if msg.contains("must be provided")));
    }

    #[test]
    fn request_deserializes_without_resolution_state() {
        let request: ApprovalRequest = serde_json::from_value(serde_json::json!({
            "id": "r7",
            "tool_call_id": "call-9",
            "sender": "WriteFile",
            "action": "edit file",
            "description": "write hello.txt",
            "display": [{"type": "brief", "text": "hello.txt"}]
        }))
        .expect("request");
        assert_eq!(request.sender, "WriteFile");
        assert!(!request.is_resolved());
    }
}
