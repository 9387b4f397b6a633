//! Agent interaction SDK.
//!
//! Send prompts to an agent run loop and consume either the raw [`Event`]
//! stream of a [`Session`] or the aggregated [`Message`] stream returned by
//! [`prompt`]. Concrete runtimes are namespaced under `vendors::*`.
//!
//! # Low-level session usage
//!
//! ```no_run
//! use futures::StreamExt as _;
//! use agent_sdk::prelude::*;
//! use agent_sdk::vendors::kimi_cli::KimiCliRuntime;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), SdkError> {
//! let runtime = KimiCliRuntime::from_env()?;
//! let session = Session::create(&runtime, SessionOptions::new().work_dir(".")).await?;
//!
//! let mut events = session.prompt("List the files here")?;
//! while let Some(event) = events.next().await {
//!     match event? {
//!         Event::ContentPart(ContentPart::Text { text }) => print!("{text}"),
//!         Event::ApprovalRequest(request) => {
//!             request.resolve(ApprovalResponse::Approve);
//!         }
//!         _ => {}
//!     }
//! }
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

/// Aggregation of raw events into messages.
pub mod aggregator;
/// Approval requests, handlers, and the gate that resolves them.
pub mod approval;
/// Agent configuration file model.
pub mod config;
/// Content parts, merge rules, and user input.
pub mod content;
/// Public error types.
pub mod errors;
/// Aggregated messages and tool-call types.
pub mod message;
/// Tracing subscriber setup.
pub mod observability;
/// Session creation knobs.
pub mod options;
/// Common imports for typical usage.
pub mod prelude;
/// High-level one-call prompting.
pub mod prompt;
/// Contracts a concrete agent runtime implements.
pub mod runtime;
/// Single-flight session wrapper.
pub mod session;
/// Caller-implemented tools the agent can invoke.
pub mod tools;
/// Tool-call accumulation.
pub mod tracker;
/// Concrete runtimes.
pub mod vendors;
/// Raw events produced by the run loop.
pub mod wire;

pub use aggregator::{MessageAggregator, OutputMode};
pub use approval::{
    ApprovalGate, ApprovalHandler, ApprovalRequest, ApprovalResponse, PendingApproval,
};
pub use config::{Config, ConfigSource};
pub use content::{Content, ContentPart, MediaUrl, extract_text, merge_content};
pub use errors::{RuntimeError, SdkError};
pub use message::{DisplayBlock, Message, Role, ToolCall, ToolResult, ToolReturnValue};
pub use observability::{ObservabilitySettings, init_observability};
pub use options::{McpConfig, McpServer, RalphIterations, SessionOptions};
pub use prompt::{MessageStream, PromptOptions, prompt, prompt_text};
pub use runtime::{AgentRuntime, EventStream, RunLoop, RunRequest};
pub use session::{PromptStream, RunOptions, Session};
pub use tools::{ExternalTool, FnTool, ToolDefinition, ToolRegistry, tool_fn};
pub use tracker::ToolCallTracker;
pub use wire::{Event, StatusSnapshot, TokenUsage};
