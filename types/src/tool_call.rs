//! Tool-call record and its status state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of one model-requested tool invocation.
///
/// ```text
/// Pending -> { Success, Error, Preview }
/// Preview -> { Success, Error, Rejected }
/// Success -> Undone
/// ```
///
/// `Error`, `Rejected`, and `Undone` are terminal. `Pending -> Success/Error`
/// skips `Preview` only when the session is not approval-gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Input still streaming in, or assembled but not yet executed.
    Pending,
    /// Executed against the scene store and applied.
    Success,
    /// Execution failed; the message is in `ToolCall::error`.
    Error,
    /// Deferred, awaiting user approval or rejection.
    Preview,
    /// User rejected the call; it never executed.
    Rejected,
    /// Previously applied, then reversed via batch undo.
    Undone,
}

impl ToolCallStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ToolCallStatus::Error | ToolCallStatus::Rejected | ToolCallStatus::Undone
        )
    }

    /// Whether the state machine permits `self -> next`.
    #[must_use]
    pub const fn can_transition_to(self, next: ToolCallStatus) -> bool {
        matches!(
            (self, next),
            (
                ToolCallStatus::Pending,
                ToolCallStatus::Success | ToolCallStatus::Error | ToolCallStatus::Preview
            ) | (
                ToolCallStatus::Preview,
                ToolCallStatus::Success | ToolCallStatus::Error | ToolCallStatus::Rejected
            ) | (ToolCallStatus::Success, ToolCallStatus::Undone)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid tool call status transition {from:?} -> {to:?}")]
pub struct StatusTransitionError {
    pub from: ToolCallStatus,
    pub to: ToolCallStatus,
}

/// One model-requested invocation, owned by its parent message.
///
/// `input` is append-only (via the assembler's buffer) until the stream
/// block closes, then immutable; only status/result/error transition after
/// that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique within the conversation, assigned by the completion service.
    pub id: String,
    /// The name of the tool being called.
    pub name: String,
    /// Assembled input, as parsed JSON. `{}` until the block closes, and
    /// `{}` again if the streamed fragments fail to parse.
    pub input: serde_json::Value,
    pub status: ToolCallStatus,
    /// Executor output when `status` is `Success` (or was, before `Undone`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Executor failure message when `status` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fixed at creation from the tool definition's mutation semantics.
    pub undoable: bool,
}

impl ToolCall {
    /// Open a pending call with empty input. The assembler fills `input`
    /// when the corresponding stream block closes.
    #[must_use]
    pub fn pending(id: impl Into<String>, name: impl Into<String>, undoable: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input: serde_json::Value::Object(serde_json::Map::new()),
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
            undoable,
        }
    }

    fn transition(&mut self, to: ToolCallStatus) -> Result<(), StatusTransitionError> {
        if self.status.can_transition_to(to) {
            self.status = to;
            Ok(())
        } else {
            Err(StatusTransitionError {
                from: self.status,
                to,
            })
        }
    }

    /// Record a successful execution. Valid from `Pending` or `Preview`.
    pub fn resolve_success(&mut self, result: impl Into<String>) -> Result<(), StatusTransitionError> {
        self.transition(ToolCallStatus::Success)?;
        self.result = Some(result.into());
        Ok(())
    }

    /// Record a failed execution. Valid from `Pending` or `Preview`.
    pub fn resolve_error(&mut self, message: impl Into<String>) -> Result<(), StatusTransitionError> {
        self.transition(ToolCallStatus::Error)?;
        self.error = Some(message.into());
        Ok(())
    }

    /// Defer execution pending user approval. Valid from `Pending`.
    pub fn defer(&mut self) -> Result<(), StatusTransitionError> {
        self.transition(ToolCallStatus::Preview)
    }

    /// User rejected the deferred call. Valid from `Preview`.
    pub fn reject(&mut self) -> Result<(), StatusTransitionError> {
        self.transition(ToolCallStatus::Rejected)
    }

    /// The call's effect was reversed via batch undo. Valid from `Success`.
    pub fn mark_undone(&mut self) -> Result<(), StatusTransitionError> {
        self.transition(ToolCallStatus::Undone)
    }

    /// Result-or-error string fed back to the model as a tool result block.
    #[must_use]
    pub fn result_text(&self) -> &str {
        match self.status {
            ToolCallStatus::Error => self.error.as_deref().unwrap_or("Tool execution failed"),
            _ => self.result.as_deref().unwrap_or(""),
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.status, ToolCallStatus::Error)
    }
}
