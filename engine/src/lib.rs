//! Chat session orchestration for Stagehand.
//!
//! The engine owns the conversation transcript and drives the tool loop: it
//! sends the transcript to the completion service, folds streamed events into
//! the active assistant message, executes or defers the tool calls the model
//! requests, feeds results back, and repeats until the model stops asking for
//! tools (or the round cap is reached).
//!
//! The two seams are traits: [`SceneStore`] is the host application's mutable
//! scene (tool execution and undo), and [`CompletionService`] is the streaming
//! model backend. Production uses [`AnthropicCompletion`]; tests script
//! [`StreamEvent`] sequences through a stub service.

mod approval;
mod assembler;
mod completion;
mod gate;
mod persistence;
mod session;
mod store;
mod turn_loop;


pub use assembler::{AssembleError, AssembledCall, ToolCallAssembler};
pub use completion::{
    AnthropicCompletion, CompletionRequest, CompletionService, StreamHandle,
};
pub use gate::ApprovalMode;
pub use persistence::SessionArchive;
pub use session::{ApprovalError, CancelHandle, ChatSession, SendError, SessionStats};
pub use store::{SceneStore, ToolExecution};

pub use stagehand_providers::ApiConfig;
pub use stagehand_types::{
    ApiUsage, ChatMessage, ChatRole, ContentBlock, ImageAttachment, MessageFeedback, MessageId,
    StopReason, StreamEvent, ToolCall, ToolCallStatus, ToolDefinition, TranscriptMessage,
};

/// Most tool rounds a single user send may consume.
pub const MAX_TOOL_ROUNDS: u32 = 10;

/// Most recent messages kept when archiving a session to disk.
pub const HISTORY_PERSIST_CAP: usize = 50;

pub(crate) const STREAM_EVENT_CHANNEL_CAPACITY: usize = 1024;
