//! Settling deferred tool calls: approval, rejection, and batch undo.

use stagehand_types::{MessageId, ToolCallStatus};

use crate::completion::CompletionService;
use crate::session::{ApprovalError, ChatSession};
use crate::store::SceneStore;
use crate::turn_loop::execute_call;

impl<S: SceneStore, C: CompletionService> ChatSession<S, C> {
    /// Execute every previewed call on the message, in stream order.
    ///
    /// Each call settles independently: an execution failure marks that call
    /// `Error` and the remaining previews still run. Returns the number of
    /// previews processed; zero means there was nothing left to approve.
    pub fn approve_tool_calls(&mut self, id: MessageId) -> Result<usize, ApprovalError> {
        if self.is_streaming() {
            return Err(ApprovalError::Busy);
        }
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(ApprovalError::UnknownMessage(id))?;

        let mut approved = 0;
        for call in &mut message.tool_calls {
            if call.status == ToolCallStatus::Preview {
                execute_call(&mut self.store, call, &mut self.stats);
                approved += 1;
            }
        }
        Ok(approved)
    }

    /// Reject every previewed call on the message. Rejection is terminal;
    /// the calls never execute. Returns the number rejected.
    pub fn reject_tool_calls(&mut self, id: MessageId) -> Result<usize, ApprovalError> {
        if self.is_streaming() {
            return Err(ApprovalError::Busy);
        }
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(ApprovalError::UnknownMessage(id))?;

        let mut rejected = 0;
        for call in &mut message.tool_calls {
            if call.status == ToolCallStatus::Preview {
                if let Err(e) = call.reject() {
                    tracing::warn!(%e, call_id = %call.id, "Failed to reject tool call");
                    continue;
                }
                rejected += 1;
            }
        }
        Ok(rejected)
    }

    /// Reverse the message's applied scene mutations.
    ///
    /// Undo is best-effort against the scene's shared undo history: it pops
    /// one history entry per undoable `Success` call and stops at the first
    /// entry the store cannot pop, so only a prefix of the calls (in message
    /// order) transitions to `Undone`. Manual edits share the same history
    /// and can shrink how far the undo reaches. Returns the number of calls
    /// undone.
    pub fn batch_undo_message(&mut self, id: MessageId) -> Result<usize, ApprovalError> {
        if self.is_streaming() {
            return Err(ApprovalError::Busy);
        }
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(ApprovalError::UnknownMessage(id))?;

        let mut undone = 0;
        for call in &mut message.tool_calls {
            if call.status != ToolCallStatus::Success || !call.undoable {
                continue;
            }
            if !self.store.undo_last() {
                tracing::warn!(
                    call_id = %call.id,
                    "Undo history exhausted; leaving remaining calls applied"
                );
                break;
            }
            if let Err(e) = call.mark_undone() {
                tracing::warn!(%e, call_id = %call.id, "Failed to mark call undone");
                break;
            }
            undone += 1;
        }
        Ok(undone)
    }
}
