//! Common imports for typical SDK usage.
pub use crate::{
    ApprovalHandler, ApprovalRequest, ApprovalResponse, Content, ContentPart, Event, Message,
    MessageStream, OutputMode, PromptOptions, PromptStream, Role, SdkError, Session,
    SessionOptions, prompt, prompt_text,
};
