/// Errors raised by an agent runtime while creating sessions or running
/// turns, before they are normalized for the public API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// No model is configured for the session.
    #[error("LLM is not set")]
    LlmNotSet,
    /// The configured model lacks a capability the input needs.
    #[error("LLM {model} does not support required capabilities: {capabilities}")]
    LlmNotSupported { model: String, capabilities: String },
    /// The model provider returned a failure.
    #[error("chat provider error: {message}")]
    ChatProvider {
        message: String,
        status_code: Option<u16>,
    },
    /// The turn hit the configured step ceiling.
    #[error("max steps reached: {steps}")]
    MaxStepsReached { steps: u32 },
    /// The turn was cancelled.
    #[error("run cancelled")]
    Cancelled,
    /// Process or stream I/O failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The runtime produced malformed or out-of-order data.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The runtime rejected its configuration.
    #[error("runtime config error: {0}")]
    Config(String),
}

impl RuntimeError {
    /// Creates a provider-level error.
    pub fn chat_provider(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::ChatProvider {
            message: message.into(),
            status_code,
        }
    }

    /// Creates a process or stream I/O error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates an error for malformed or unexpected runtime data.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(value: std::io::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Top-level error type for the public SDK API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SdkError {
    /// Invalid options or configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Operation not allowed in the session's current state (closed,
    /// already running, ...).
    #[error("session error: {0}")]
    SessionState(String),
    /// The operation was cancelled before it completed.
    #[error("cancelled")]
    Cancelled,
    /// Failure reported by the underlying runtime.
    #[error(transparent)]
    Runtime(RuntimeError),
}

impl SdkError {
    pub(crate) fn session_state(message: impl Into<String>) -> Self {
        Self::SessionState(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<RuntimeError> for SdkError {
    fn from(value: RuntimeError) -> Self {
        match value {
            RuntimeError::Cancelled => SdkError::Cancelled,
            other => SdkError::Runtime(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_cancellation_maps_to_sdk_cancellation() {
        let err = SdkError::from(RuntimeError::Cancelled);
        assert!(err.is_cancelled());
    }

    #[test]
    fn runtime_failures_stay_wrapped() {
        let err = SdkError::from(RuntimeError::MaxStepsReached { steps: 3 });
        assert!(matches!(
            err,
            SdkError::Runtime(RuntimeError::MaxStepsReached { steps: 3 })
        ));
        assert_eq!(err.to_string(), "max steps reached: 3");
    }

    #[test]
    fn io_errors_become_transport_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        assert!(matches!(
            RuntimeError::from(io),
            RuntimeError::Transport(msg) if msg.contains("pipe closed")
        ));
    }
}
