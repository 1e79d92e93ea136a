//! The chat session: transcript ownership and caller-facing operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::AbortHandle;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stagehand_types::{ApiUsage, ChatMessage, MessageFeedback, MessageId, ToolDefinition};

use crate::completion::CompletionService;
use crate::gate::ApprovalMode;
use crate::store::SceneStore;

/// Running totals for the session, reset by [`ChatSession::clear_chat`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Cumulative token usage across every completed round.
    pub usage: ApiUsage,
    /// Number of completion requests issued (one per tool round).
    pub requests: u64,
    /// Number of tool executions attempted against the scene.
    pub tools_executed: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("a response is already streaming")]
    AlreadyStreaming,
    #[error("message must contain text or an image")]
    EmptyMessage,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("no message with id {0}")]
    UnknownMessage(MessageId),
    #[error("transcript is busy while a response is streaming")]
    Busy,
}

/// Cancels the in-flight completion from outside the session borrow.
///
/// `send_message` holds `&mut self` for the whole turn, so cancellation has
/// to travel through shared state: the flag stops the event loop, the abort
/// handle tears down the underlying request.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    abort_slot: Arc<Mutex<Option<AbortHandle>>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        match self.abort_slot.lock() {
            Ok(mut slot) => {
                if let Some(handle) = slot.take() {
                    handle.abort();
                }
            }
            Err(e) => tracing::warn!(%e, "Abort slot lock poisoned; stream will stop at next event"),
        }
    }
}

/// One conversation against one scene.
///
/// Generic over the scene seam and the completion backend so the whole tool
/// loop is testable with scripted streams.
pub struct ChatSession<S, C> {
    pub(crate) store: S,
    pub(crate) completion: C,
    pub(crate) system_prompt: String,
    pub(crate) tools: Vec<ToolDefinition>,
    pub(crate) messages: Vec<ChatMessage>,
    pub(crate) approval_mode: ApprovalMode,
    pub(crate) stats: SessionStats,
    pub(crate) last_error: Option<String>,
    pub(crate) next_message_id: u64,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) in_flight: Arc<AtomicBool>,
    pub(crate) abort_slot: Arc<Mutex<Option<AbortHandle>>>,
}

impl<S: SceneStore, C: CompletionService> ChatSession<S, C> {
    #[must_use]
    pub fn new(
        store: S,
        completion: C,
        system_prompt: impl Into<String>,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            store,
            completion,
            system_prompt: system_prompt.into(),
            tools,
            messages: Vec::new(),
            approval_mode: ApprovalMode::default(),
            stats: SessionStats::default(),
            last_error: None,
            next_message_id: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
            abort_slot: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn with_approval_mode(mut self, mode: ApprovalMode) -> Self {
        self.approval_mode = mode;
        self
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    #[must_use]
    pub const fn approval_mode(&self) -> ApprovalMode {
        self.approval_mode
    }

    pub fn set_approval_mode(&mut self, mode: ApprovalMode) {
        self.approval_mode = mode;
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Transport-level failure from the most recent send, if any. Per-call
    /// tool failures stay on their `ToolCall`; only stream and connection
    /// errors surface here.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Shared handle for cancelling an in-flight turn from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
            abort_slot: Arc::clone(&self.abort_slot),
        }
    }

    /// Stop the in-flight completion. Content streamed so far is kept;
    /// unexecuted tool calls resolve as errors.
    pub fn stop_streaming(&self) {
        self.cancel_handle().cancel();
    }

    /// Drop the transcript and reset the session counters. The scene itself
    /// is untouched; message ids keep increasing so stale ids never alias.
    pub fn clear_chat(&mut self) {
        self.messages.clear();
        self.stats = SessionStats::default();
        self.last_error = None;
    }

    /// Record or clear a thumbs-up/down on a message.
    pub fn set_message_feedback(
        &mut self,
        id: MessageId,
        feedback: Option<MessageFeedback>,
    ) -> Result<(), ApprovalError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(ApprovalError::UnknownMessage(id))?;
        message.feedback = feedback;
        Ok(())
    }

    pub(crate) fn alloc_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id += 1;
        id
    }

    pub(crate) fn store_abort_handle(&self, handle: AbortHandle) {
        match self.abort_slot.lock() {
            Ok(mut slot) => *slot = Some(handle),
            Err(e) => tracing::warn!(%e, "Abort slot lock poisoned; cancel will rely on the flag"),
        }
    }

    pub(crate) fn clear_abort_handle(&self) {
        if let Ok(mut slot) = self.abort_slot.lock() {
            *slot = None;
        }
    }
}
