use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::content::Content;
use crate::errors::SdkError;
use crate::options::SessionOptions;
use crate::runtime::{AgentRuntime, EventStream, RunLoop, RunRequest};
use crate::wire::{Event, StatusSnapshot, TokenUsage};

/// Per-prompt options for [`Session::prompt_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Ask the run loop to coalesce consecutive fragments.
    pub merge_wire_messages: bool,
}

impl RunOptions {
    pub fn merge_wire_messages(mut self, merge: bool) -> Self {
        self.merge_wire_messages = merge;
        self
    }
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct FlightState {
    in_flight: Mutex<Option<InFlight>>,
    closed: AtomicBool,
    generations: AtomicU64,
    /// Tokens reported during the current or most recent prompt.
    usage: Mutex<TokenUsage>,
}

impl FlightState {
    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn usage(&self) -> MutexGuard<'_, TokenUsage> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears the slot if it still belongs to `generation`.
    fn release(&self, generation: u64) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|f| f.generation == generation) {
            *slot = None;
        }
    }

    fn cancel_in_flight(&self) -> bool {
        match self.slot().as_ref() {
            Some(flight) => {
                flight.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

/// Low-level session over one agent run loop.
///
/// A session runs at most one prompt at a time. Call [`close`](Self::close)
/// on every exit path; dropping an unclosed session only signals
/// cancellation to a prompt still in flight.
pub struct Session {
    run_loop: Arc<dyn RunLoop>,
    state: Arc<FlightState>,
}

impl Session {
    /// Creates a new session through `runtime`.
    pub async fn create(
        runtime: &dyn AgentRuntime,
        options: SessionOptions,
    ) -> Result<Self, SdkError> {
        options.validate()?;
        let run_loop = runtime.create(&options).await?;
        debug!(session_id = %run_loop.id(), model = %run_loop.model_name(), "session created");
        Ok(Self::from_run_loop(run_loop))
    }

    /// Resumes a stored session. Returns `Ok(None)` when no session matches.
    pub async fn resume(
        runtime: &dyn AgentRuntime,
        options: SessionOptions,
    ) -> Result<Option<Self>, SdkError> {
        options.validate()?;
        let Some(run_loop) = runtime.resume(&options).await? else {
            debug!(session_id = ?options.session_id, "no session to resume");
            return Ok(None);
        };
        debug!(session_id = %run_loop.id(), "session resumed");
        Ok(Some(Self::from_run_loop(run_loop)))
    }

    /// Wraps an existing run loop.
    pub fn from_run_loop(run_loop: Arc<dyn RunLoop>) -> Self {
        Self {
            run_loop,
            state: Arc::default(),
        }
    }

    pub fn id(&self) -> &str {
        self.run_loop.id()
    }

    pub fn model_name(&self) -> &str {
        self.run_loop.model_name()
    }

    /// Context usage and run-mode snapshot.
    pub fn status(&self) -> StatusSnapshot {
        self.run_loop.status()
    }

    /// Tokens reported by the run loop during the prompt in flight, or the
    /// last prompt once it has ended. Reset when a new prompt starts.
    pub fn token_usage(&self) -> TokenUsage {
        *self.state.usage()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// `true` while a prompt stream is alive.
    pub fn is_running(&self) -> bool {
        self.state.slot().is_some()
    }

    /// Sends a prompt and returns the raw event stream.
    ///
    /// Approval requests are yielded as-is and must be resolved by the
    /// caller; one dropped unresolved counts as rejected.
    pub fn prompt(&self, input: impl Into<Content>) -> Result<PromptStream, SdkError> {
        self.prompt_with(input, RunOptions::default())
    }

    /// Like [`prompt`](Self::prompt) with explicit run options.
    pub fn prompt_with(
        &self,
        input: impl Into<Content>,
        options: RunOptions,
    ) -> Result<PromptStream, SdkError> {
        let guard = {
            let mut slot = self.state.slot();
            if self.is_closed() {
                return Err(SdkError::session_state("session is closed"));
            }
            if slot.is_some() {
                return Err(SdkError::session_state("session is already running"));
            }
            *self.state.usage() = TokenUsage::default();
            let generation = self.state.generations.fetch_add(1, Ordering::SeqCst);
            let cancel = CancellationToken::new();
            *slot = Some(InFlight {
                generation,
                cancel: cancel.clone(),
            });
            FlightGuard {
                state: self.state.clone(),
                generation,
                cancel,
            }
        };

        debug!(session_id = %self.id(), generation = guard.generation, "prompt started");
        let inner = self.run_loop.start_run(RunRequest {
            input: input.into(),
            cancel: guard.cancel.clone(),
            merge_wire_messages: options.merge_wire_messages,
        })?;
        Ok(PromptStream {
            inner,
            guard: Some(guard),
            usage: TokenUsage::default(),
        })
    }

    /// Signals cancellation to the prompt in flight, if any.
    pub fn cancel(&self) {
        if self.state.cancel_in_flight() {
            debug!(session_id = %self.id(), "prompt cancellation requested");
        }
    }

    /// Closes the session: cancels the prompt in flight and releases the
    /// run loop's resources. Later calls do nothing.
    pub async fn close(&self) -> Result<(), SdkError> {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.state.cancel_in_flight();
        debug!(session_id = %self.id(), "closing session");
        self.run_loop.cleanup().await?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.state.closed.swap(true, Ordering::SeqCst) {
            self.state.cancel_in_flight();
            debug!(session_id = %self.run_loop.id(), "session dropped without close");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Owns the in-flight slot for one prompt; clears it when dropped.
struct FlightGuard {
    state: Arc<FlightState>,
    generation: u64,
    cancel: CancellationToken,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.state.release(self.generation);
        debug!(generation = self.generation, "prompt finished");
    }
}

/// Raw event stream of one prompt.
///
/// The session accepts a new prompt once this stream has ended, failed, or
/// been dropped. Errors are terminal. A run that stops after cancellation
/// without reporting it ends with [`SdkError::Cancelled`].
pub struct PromptStream {
    inner: EventStream,
    guard: Option<FlightGuard>,
    usage: TokenUsage,
}

impl PromptStream {
    /// Cancellation flag of this prompt; `None` once the stream has ended.
    pub fn cancellation_token(&self) -> Option<CancellationToken> {
        self.guard.as_ref().map(|g| g.cancel.clone())
    }

    /// Tokens reported so far by this prompt's status updates.
    pub fn token_usage(&self) -> TokenUsage {
        self.usage
    }
}

impl futures::Stream for PromptStream {
    type Item = Result<Event, SdkError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(guard) = &this.guard else {
            return Poll::Ready(None);
        };
        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(event))) => {
                if let Event::StatusUpdate(update) = &event
                    && let Some(tokens) = update.token_usage
                {
                    this.usage += tokens;
                    *guard.state.usage() = this.usage;
                }
                Poll::Ready(Some(Ok(event)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.guard = None;
                Poll::Ready(Some(Err(err.into())))
            }
            Poll::Ready(None) => {
                let cancelled = guard.cancel.is_cancelled();
                this.guard = None;
                if cancelled {
                    Poll::Ready(Some(Err(SdkError::Cancelled)))
                } else {
                    Poll::Ready(None)
                }
            }
        }
    }
}

impl std::fmt::Debug for PromptStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptStream")
            .field("generation", &self.guard.as_ref().map(|g| g.generation))
            .field("terminated", &self.guard.is_none())
            .finish_non_exhaustive()
    }
}

impl futures::stream::FusedStream for PromptStream {
    fn is_terminated(&self) -> bool {
        self.guard.is_none()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;

    use super::*;
    use crate::content::ContentPart;
    use crate::errors::RuntimeError;
    use crate::runtime::scripted::{Script, ScriptedRunLoop, ScriptedRuntime};
    use crate::wire::StatusUpdate;

    fn session(scripts: Vec<Script>) -> (Session, Arc<ScriptedRunLoop>) {
        let run_loop = ScriptedRunLoop::new("s-1", scripts);
        (Session::from_run_loop(run_loop.clone()), run_loop)
    }

    #[tokio::test]
    async fn second_prompt_is_rejected_while_first_is_in_flight() {
        let (session, run_loop) = session(vec![
            Script::Events(vec![Ok(Event::ContentPart(ContentPart::text("a")))]),
            Script::Events(vec![]),
        ]);

        let mut first = session.prompt("one").expect("first prompt");
        let err = session.prompt("two").expect_err("concurrent prompt");
        assert!(matches!(err, SdkError::SessionState(msg) if msg.contains("already running")));
        assert_eq!(run_loop.runs.load(Ordering::SeqCst), 1);

        while first.next().await.is_some() {}
        assert!(!session.is_running());

        let mut second = session.prompt("three").expect("prompt after completion");
        assert!(second.next().await.is_none());
        assert_eq!(run_loop.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropping_the_stream_frees_the_session() {
        let (session, _run_loop) = session(vec![Script::UntilCancelled(vec![])]);
        let stream = session.prompt("hi").expect("prompt");
        assert!(session.is_running());
        drop(stream);
        assert!(!session.is_running());
        assert!(session.prompt("again").is_ok());
    }

    #[tokio::test]
    async fn cancel_without_prompt_is_a_no_op() {
        let (session, _run_loop) = session(vec![Script::Events(vec![])]);
        session.cancel();
        let mut stream = session.prompt("hi").expect("prompt");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cancel_ends_the_stream_with_cancellation() {
        let (session, _run_loop) = session(vec![Script::UntilCancelled(vec![
            Event::ContentPart(ContentPart::text("partial")),
        ])]);
        let mut stream = session.prompt("hi").expect("prompt");
        assert!(matches!(stream.next().await, Some(Ok(Event::ContentPart(_)))));

        session.cancel();
        let outcome = stream.next().await.expect("terminal item");
        assert!(matches!(outcome, Err(ref err) if err.is_cancelled()));
        assert!(stream.next().await.is_none());
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn each_prompt_gets_a_fresh_cancellation_flag() {
        let (session, _run_loop) = session(vec![
            Script::UntilCancelled(vec![]),
            Script::Events(vec![]),
        ]);
        let mut first = session.prompt("one").expect("first");
        session.cancel();
        assert!(matches!(first.next().await, Some(Err(SdkError::Cancelled))));

        let second = session.prompt("two").expect("second");
        let token = second.cancellation_token().expect("token");
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn runtime_errors_are_terminal_and_release_the_slot() {
        let (session, _run_loop) = session(vec![Script::Events(vec![
            Err(RuntimeError::MaxStepsReached { steps: 5 }),
            Ok(Event::StepInterrupted),
        ])]);
        let mut stream = session.prompt("hi").expect("prompt");
        assert!(matches!(
            stream.next().await,
            Some(Err(SdkError::Runtime(RuntimeError::MaxStepsReached { steps: 5 })))
        ));
        assert!(stream.next().await.is_none());
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn start_failure_leaves_session_usable() {
        let (session, _run_loop) = session(vec![
            Script::StartError(RuntimeError::LlmNotSet),
            Script::Events(vec![]),
        ]);
        let err = session.prompt("hi").expect_err("start error");
        assert!(matches!(err, SdkError::Runtime(RuntimeError::LlmNotSet)));
        assert!(session.prompt("retry").is_ok());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_cancels_in_flight_prompt() {
        let (session, run_loop) = session(vec![Script::UntilCancelled(vec![])]);
        let mut stream = session.prompt("hi").expect("prompt");

        session.close().await.expect("close");
        session.close().await.expect("second close");
        assert_eq!(run_loop.cleanups.load(Ordering::SeqCst), 1);
        assert!(session.is_closed());
        assert!(matches!(stream.next().await, Some(Err(SdkError::Cancelled))));

        let err = session.prompt("after close").expect_err("closed");
        assert!(matches!(err, SdkError::SessionState(msg) if msg.contains("closed")));
    }

    #[tokio::test]
    async fn dropping_an_unclosed_session_cancels_its_prompt() {
        let (session, _run_loop) = session(vec![Script::UntilCancelled(vec![])]);
        let mut stream = session.prompt("hi").expect("prompt");
        drop(session);
        assert!(matches!(stream.next().await, Some(Err(SdkError::Cancelled))));
    }

    #[tokio::test]
    async fn prompt_with_forwards_merge_flag() {
        let (session, run_loop) = session(vec![Script::Events(vec![])]);
        let _stream = session
            .prompt_with("hi", RunOptions::default().merge_wire_messages(true))
            .expect("prompt");
        assert_eq!(*run_loop.merge_flags.lock().expect("flags"), vec![true]);
    }

    fn tokens(input_other: u64, output: u64) -> Result<Event, RuntimeError> {
        Ok(Event::StatusUpdate(StatusUpdate {
            context_usage: Some(0.1),
            token_usage: Some(TokenUsage {
                input_other,
                output,
                ..TokenUsage::default()
            }),
            message_id: None,
        }))
    }

    #[tokio::test]
    async fn token_usage_accumulates_per_prompt() {
        let (session, _run_loop) = session(vec![
            Script::Events(vec![
                tokens(100, 20),
                Ok(Event::ContentPart(ContentPart::text("a"))),
                tokens(50, 5),
            ]),
            Script::Events(vec![tokens(7, 1)]),
        ]);

        let mut first = session.prompt("one").expect("first");
        assert!(first.next().await.is_some());
        assert_eq!(session.token_usage().input_other, 100);
        while first.next().await.is_some() {}
        let expected = TokenUsage {
            input_other: 150,
            output: 25,
            ..TokenUsage::default()
        };
        assert_eq!(first.token_usage(), expected);
        assert_eq!(session.token_usage(), expected);
        assert_eq!(session.token_usage().total(), 175);

        let mut second = session.prompt("two").expect("second");
        assert_eq!(session.token_usage(), TokenUsage::default());
        while second.next().await.is_some() {}
        assert_eq!(session.token_usage().total(), 8);
    }

    #[tokio::test]
    async fn prompt_stream_debug_reports_termination() {
        let (session, _run_loop) = session(vec![Script::Events(vec![])]);
        let mut stream = session.prompt("hi").expect("prompt");
        assert!(format!("{stream:?}").contains("terminated: false"));
        assert!(stream.next().await.is_none());
        assert!(format!("{stream:?}").contains("terminated: true"));
    }

    #[tokio::test]
    async fn resume_returns_none_when_nothing_matches() {
        let runtime = ScriptedRuntime::new(vec![]);
        let missing = Session::resume(&runtime, SessionOptions::new().session_id("other"))
            .await
            .expect("resume");
        assert!(missing.is_none());

        let latest = Session::resume(&runtime, SessionOptions::new())
            .await
            .expect("resume")
            .expect("most recent session");
        assert_eq!(latest.id(), "session-1");
        assert_eq!(latest.model_name(), "scripted-model");
        assert_eq!(latest.status().context_usage, 0.5);
    }
}
