use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::content::Content;
use crate::errors::RuntimeError;
use crate::options::SessionOptions;
use crate::wire::{Event, StatusSnapshot};

/// Raw event stream of one run.
pub type EventStream = Pin<Box<dyn futures::Stream<Item = Result<Event, RuntimeError>> + Send>>;

/// Input for a single run of the agent loop.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub input: Content,
    /// Cooperative cancellation flag. The run loop checks it at its own
    /// suspension points and ends the stream with [`RuntimeError::Cancelled`].
    pub cancel: CancellationToken,
    /// Ask the run loop to coalesce consecutive fragments before emitting.
    pub merge_wire_messages: bool,
}

/// Factory for run loops: creates new sessions or resumes stored ones.
///
/// Implementations live under `vendors::*`.
#[async_trait::async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Creates a new session.
    async fn create(&self, options: &SessionOptions) -> Result<Arc<dyn RunLoop>, RuntimeError>;

    /// Resumes `options.session_id`, or the most recent session in the work
    /// dir when no id is given. `Ok(None)` when nothing matches.
    async fn resume(
        &self,
        options: &SessionOptions,
    ) -> Result<Option<Arc<dyn RunLoop>>, RuntimeError>;
}

/// One live agent session as seen by the SDK.
#[async_trait::async_trait]
pub trait RunLoop: Send + Sync {
    fn id(&self) -> &str;

    fn model_name(&self) -> &str;

    fn status(&self) -> StatusSnapshot;

    /// Starts one run. The returned stream does its work lazily as it is
    /// polled and must end with `Err(RuntimeError::Cancelled)` once it
    /// observes `request.cancel`.
    fn start_run(&self, request: RunRequest) -> Result<EventStream, RuntimeError>;

    /// Releases resources held for the session (tool processes, MCP
    /// connections, ...).
    async fn cleanup(&self) -> Result<(), RuntimeError>;
}

#[cfg(test)]
pub(crate) mod scripted {
    //! In-memory runtime double driven by per-run scripts.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt as _;
    use futures::stream;

    use super::*;

    pub(crate) enum Script {
        /// Yields the items, then ends.
        Events(Vec<Result<Event, RuntimeError>>),
        /// Yields the events, then waits for cancellation.
        UntilCancelled(Vec<Event>),
        /// Fails before producing a stream.
        StartError(RuntimeError),
    }

    pub(crate) struct ScriptedRunLoop {
        id: String,
        scripts: Mutex<VecDeque<Script>>,
        pub(crate) runs: AtomicUsize,
        pub(crate) cleanups: AtomicUsize,
        pub(crate) inputs: Mutex<Vec<Content>>,
        pub(crate) merge_flags: Mutex<Vec<bool>>,
    }

    impl ScriptedRunLoop {
        pub(crate) fn new(id: &str, scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                scripts: Mutex::new(scripts.into()),
                runs: AtomicUsize::new(0),
                cleanups: AtomicUsize::new(0),
                inputs: Mutex::new(Vec::new()),
                merge_flags: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl RunLoop for ScriptedRunLoop {
        fn id(&self) -> &str {
            &self.id
        }

        fn model_name(&self) -> &str {
            "scripted-model"
        }

        fn status(&self) -> StatusSnapshot {
            StatusSnapshot {
                context_usage: 0.5,
                yolo_enabled: false,
            }
        }

        fn start_run(&self, request: RunRequest) -> Result<EventStream, RuntimeError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.inputs.lock().expect("inputs").push(request.input);
            self.merge_flags
                .lock()
                .expect("merge flags")
                .push(request.merge_wire_messages);
            let script = self
                .scripts
                .lock()
                .expect("scripts")
                .pop_front()
                .unwrap_or(Script::Events(Vec::new()));
            match script {
                Script::Events(items) => Ok(Box::pin(stream::iter(items))),
                Script::UntilCancelled(events) => {
                    let cancel = request.cancel;
                    let tail = stream::once(async move {
                        cancel.cancelled().await;
                        Err(RuntimeError::Cancelled)
                    });
                    Ok(Box::pin(stream::iter(events.into_iter().map(Ok)).chain(tail)))
                }
                Script::StartError(err) => Err(err),
            }
        }

        async fn cleanup(&self) -> Result<(), RuntimeError> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Runtime that hands out one shared scripted run loop.
    pub(crate) struct ScriptedRuntime {
        pub(crate) run_loop: Arc<ScriptedRunLoop>,
        pub(crate) creates: AtomicUsize,
    }

    impl ScriptedRuntime {
        pub(crate) fn new(scripts: Vec<Script>) -> Self {
            Self {
                run_loop: ScriptedRunLoop::new("session-1", scripts),
                creates: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl AgentRuntime for ScriptedRuntime {
        async fn create(
            &self,
            _options: &SessionOptions,
        ) -> Result<Arc<dyn RunLoop>, RuntimeError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            let run_loop: Arc<dyn RunLoop> = self.run_loop.clone();
            Ok(run_loop)
        }

        async fn resume(
            &self,
            options: &SessionOptions,
        ) -> Result<Option<Arc<dyn RunLoop>>, RuntimeError> {
            let found = match options.session_id.as_deref() {
                None => true,
                Some(id) => id == self.run_loop.id(),
            };
            Ok(found.then(|| self.run_loop.clone() as Arc<dyn RunLoop>))
        }
    }
}
