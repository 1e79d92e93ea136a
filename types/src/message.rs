//! Conversation message domain model.
//!
//! Constructors take `SystemTime` explicitly; callers own the clock.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{ApiUsage, MessageId, ToolCall};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// User thumbs-up/down on an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFeedback {
    Helpful,
    Unhelpful,
}

/// An image attached to a user message, already base64-encoded by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    /// Base64 payload.
    pub data: String,
}

/// One conversational turn's record, owned by the session transcript.
///
/// Identity is stable once created. Body fields (`content`, `thinking`,
/// `tool_calls`) mutate in place only while this is the active streaming
/// target; after the turn ends, only tool-call status transitions remain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Per-turn usage total, stored at turn-loop exit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ApiUsage>,
    pub created_at: SystemTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<MessageFeedback>,
    /// Referenced-entity aliases -> scene-store identifiers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entity_refs: BTreeMap<String, String>,
}

impl ChatMessage {
    #[must_use]
    pub fn user(
        id: MessageId,
        content: impl Into<String>,
        images: Vec<ImageAttachment>,
        entity_refs: BTreeMap<String, String>,
        created_at: SystemTime,
    ) -> Self {
        Self {
            id,
            role: ChatRole::User,
            content: content.into(),
            images,
            thinking: None,
            tool_calls: Vec::new(),
            usage: None,
            created_at,
            feedback: None,
            entity_refs,
        }
    }

    /// An empty assistant message, the streaming target for one send.
    #[must_use]
    pub fn assistant(id: MessageId, created_at: SystemTime) -> Self {
        Self {
            id,
            role: ChatRole::Assistant,
            content: String::new(),
            images: Vec::new(),
            thinking: None,
            tool_calls: Vec::new(),
            usage: None,
            created_at,
            feedback: None,
            entity_refs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn system(id: MessageId, content: impl Into<String>, created_at: SystemTime) -> Self {
        Self {
            id,
            role: ChatRole::System,
            content: content.into(),
            images: Vec::new(),
            thinking: None,
            tool_calls: Vec::new(),
            usage: None,
            created_at,
            feedback: None,
            entity_refs: BTreeMap::new(),
        }
    }

    /// Find a tool call by its service-assigned id.
    #[must_use]
    pub fn tool_call_mut(&mut self, call_id: &str) -> Option<&mut ToolCall> {
        self.tool_calls.iter_mut().find(|call| call.id == call_id)
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
